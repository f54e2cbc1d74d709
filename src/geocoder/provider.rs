// provider.rs
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::domain::postal_code::{display_form, Coordinate};
use crate::geocoder::GeocodeError;

const USER_AGENT: &str = concat!("pinmap/", env!("CARGO_PKG_VERSION"));

/// External geocoding service consulted for codes the local store misses.
pub trait GeocodeProvider: Send + Sync {
    fn geocode_postal_code(&self, code: &str) -> Result<Coordinate, GeocodeError>;
}

/// Nominatim-style search API:
/// `GET {base}?postalcode=K1A 0A6&countrycodes=ca&format=json&limit=1`
/// answering `[{"lat": "45.42", "lon": "-75.70"}]`.
pub struct HttpGeocoder {
    client: Client,
    base_url: Url,
    country: String,
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

impl HttpGeocoder {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| GeocodeError::Provider(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            country: "ca".to_string(),
        })
    }

    fn parse_places(code: &str, body: &str) -> Result<Coordinate, GeocodeError> {
        let places: Vec<Place> = serde_json::from_str(body)
            .map_err(|e| GeocodeError::Provider(format!("malformed response: {e}")))?;

        let place = places
            .into_iter()
            .next()
            .ok_or_else(|| GeocodeError::NotFound(code.to_string()))?;

        let lat: f64 = place
            .lat
            .parse()
            .map_err(|_| GeocodeError::Provider(format!("bad latitude {:?}", place.lat)))?;
        let lng: f64 = place
            .lon
            .parse()
            .map_err(|_| GeocodeError::Provider(format!("bad longitude {:?}", place.lon)))?;

        let coord = Coordinate::new(lat, lng);
        if coord.is_valid() {
            Ok(coord)
        } else {
            Err(GeocodeError::Provider(format!("coordinate out of range ({lat}, {lng})")))
        }
    }
}

impl GeocodeProvider for HttpGeocoder {
    fn geocode_postal_code(&self, code: &str) -> Result<Coordinate, GeocodeError> {
        let postal = display_form(code);
        let start = std::time::Instant::now();

        let resp = self
            .client
            .get(self.base_url.clone())
            .query(&[
                ("postalcode", postal.as_str()),
                ("countrycodes", self.country.as_str()),
                ("format", "json"),
                ("limit", "1"),
            ])
            .send()
            .map_err(|e| GeocodeError::Provider(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .map_err(|e| GeocodeError::Provider(e.to_string()))?;

        tracing::debug!(code, %status, elapsed = ?start.elapsed(), "geocoding provider answered");

        if !status.is_success() {
            return Err(GeocodeError::Provider(format!("HTTP {status} for {postal}")));
        }

        Self::parse_places(code, &text)
    }
}
