use std::collections::HashMap;

use crate::domain::listing::Listing;
use crate::domain::marker::ListingMarker;
use crate::geocoder::Geocode;
use crate::session::SearchTicket;

/// Result of an incremental build.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerBuild {
    Complete(Vec<ListingMarker>),
    /// A newer search started while this one was geocoding; nothing from
    /// this build should be applied.
    Superseded,
}

/// Turns listings into positioned markers.
pub struct MarkerBuilder<'a> {
    geocoder: &'a dyn Geocode,
}

impl<'a> MarkerBuilder<'a> {
    pub fn new(geocoder: &'a dyn Geocode) -> Self {
        Self { geocoder }
    }

    /// Markers for every listing that has or can be given a position, in
    /// input order. Listings without coordinates or a usable postal code
    /// are left out.
    pub fn build_markers(&self, listings: &[Listing]) -> Vec<ListingMarker> {
        match self.build_markers_incremental(listings, None, |_| {}) {
            MarkerBuild::Complete(markers) => markers,
            MarkerBuild::Superseded => Vec::new(),
        }
    }

    /// Like [`MarkerBuilder::build_markers`], but hands `on_batch` the
    /// markers finished so far: once for listings that already carry
    /// coordinates, then after every geocoder sub-batch.
    pub fn build_markers_incremental<F>(
        &self,
        listings: &[Listing],
        ticket: Option<&SearchTicket>,
        mut on_batch: F,
    ) -> MarkerBuild
    where
        F: FnMut(&[ListingMarker]),
    {
        let mut slots: Vec<Option<ListingMarker>> = vec![None; listings.len()];
        let mut waiting: HashMap<String, Vec<usize>> = HashMap::new();
        let mut codes = Vec::new();

        for (idx, listing) in listings.iter().enumerate() {
            if let Some(coord) = listing.coordinate() {
                slots[idx] = Some(ListingMarker::from_listing(listing, Some(coord)));
            } else if let Some(code) = listing.postal_code() {
                let entry = waiting.entry(code.clone()).or_default();
                if entry.is_empty() {
                    codes.push(code);
                }
                entry.push(idx);
            } else {
                tracing::debug!(listing = %listing.listing_key, "no coordinates or postal code, listing left off map");
            }
        }

        if is_stale(ticket) {
            return MarkerBuild::Superseded;
        }
        on_batch(&snapshot(&slots));

        if codes.is_empty() {
            return MarkerBuild::Complete(snapshot(&slots));
        }

        for outcome in self.geocoder.batches(&codes, ticket.cloned()) {
            if is_stale(ticket) {
                return MarkerBuild::Superseded;
            }

            for (code, coord) in &outcome.results {
                for &idx in waiting.get(code).into_iter().flatten() {
                    slots[idx] = Some(ListingMarker::from_listing(&listings[idx], Some(*coord)));
                }
            }
            on_batch(&snapshot(&slots));
        }

        if is_stale(ticket) {
            return MarkerBuild::Superseded;
        }

        let markers = snapshot(&slots);
        tracing::debug!(
            listings = listings.len(),
            markers = markers.len(),
            geocoded_codes = codes.len(),
            "markers built"
        );
        MarkerBuild::Complete(markers)
    }
}

fn is_stale(ticket: Option<&SearchTicket>) -> bool {
    ticket.is_some_and(|t| !t.is_current())
}

fn snapshot(slots: &[Option<ListingMarker>]) -> Vec<ListingMarker> {
    slots.iter().flatten().cloned().collect()
}
