mod batch;
mod geocode_error;
mod provider;

pub use batch::{
    BatchGeocoder, BatchOutcome, Geocode, GeocodeProgress, GeocodeResult,
    GeocoderSettings,
};
pub use geocode_error::GeocodeError;
pub use provider::{GeocodeProvider, HttpGeocoder};
