use serde::{Deserialize, Serialize};

use crate::domain::postal_code::{self, Coordinate};

/// A listing as handed to us by the search page.
///
/// Field names follow the page's camelCase JSON, with aliases for the
/// upstream feed names so raw feed records can be posted as-is.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    #[serde(alias = "ListingKey")]
    pub listing_key: String,

    #[serde(default, alias = "UnparsedAddress")]
    pub address: String,
    #[serde(default, alias = "PostalCode")]
    pub postal_code: Option<String>,

    #[serde(default, alias = "Latitude")]
    pub latitude: Option<f64>,
    #[serde(default, alias = "Longitude")]
    pub longitude: Option<f64>,

    #[serde(default, alias = "ListPrice")]
    pub price: f64,
}

impl Listing {
    /// Coordinates carried by the listing itself, if both halves are usable.
    pub fn coordinate(&self) -> Option<Coordinate> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)).filter(|c| c.is_valid()),
            _ => None,
        }
    }

    /// Declared postal code first, then whatever the address line contains.
    pub fn postal_code(&self) -> Option<String> {
        self.postal_code
            .as_deref()
            .and_then(postal_code::normalize)
            .or_else(|| postal_code::extract_from_address(&self.address))
    }
}
