// src/domain/marker.rs

use serde::{Deserialize, Serialize};

use crate::domain::listing::Listing;
use crate::domain::postal_code::Coordinate;

/// One pin on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingMarker {
    pub listing_key: String,
    /// Absent until geocoding succeeds.
    pub position: Option<Coordinate>,
    pub price: f64,
    pub address: String,
    #[serde(default)]
    pub label: String,
}

impl ListingMarker {
    pub fn from_listing(listing: &Listing, position: Option<Coordinate>) -> Self {
        Self {
            listing_key: listing.listing_key.clone(),
            position,
            price: listing.price,
            address: listing.address.clone(),
            label: price_label(listing.price),
        }
    }
}

/// Short price used as the pin label.
///
/// `>= 1_000_000` -> `$1.3M`, `>= 1_000` -> `$650K`, else `$950`.
pub fn price_label(price: f64) -> String {
    if price >= 1_000_000.0 {
        // f64::round is half-away-from-zero, so 1.25M reads as $1.3M
        let tenths = (price / 100_000.0).round() as i64;
        format!("${}.{}M", tenths / 10, tenths % 10)
    } else if price >= 1_000.0 {
        format!("${}K", (price / 1_000.0).round() as i64)
    } else {
        format!("${}", group_thousands(price.round() as i64))
    }
}

fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if value < 0 {
        format!("-{out}")
    } else {
        out
    }
}
