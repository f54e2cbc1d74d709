use maud::{html, Markup};

use crate::domain::marker::ListingMarker;

pub mod error;

pub use error::error_page;

/// Sidebar row for one listing.
pub fn listing_row(marker: &ListingMarker) -> Markup {
    html! {
        li class="listing-row" data-listing-key=(marker.listing_key) {
            span class="listing-price" { (marker.label) }
            " "
            span class="listing-address" { (marker.address) }
        }
    }
}
