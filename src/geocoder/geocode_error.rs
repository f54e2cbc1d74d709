use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeocodeError {
    /// The local postal-code store cannot be opened or queried.
    #[error("Postal code store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("No coordinate known for postal code {0}")]
    NotFound(String),
    /// Timeout, non-2xx status or a body we could not read.
    #[error("Geocoding provider error: {0}")]
    Provider(String),
    #[error("Map initialization failed: {0}")]
    MapInit(String),
}
