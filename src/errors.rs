// errors.rs
use astra::Response;
use thiserror::Error;

use crate::geocoder::GeocodeError;

/// Errors originating from either the server logic
/// (routing, request decoding, etc.) or downstream layers (DB, geocoder).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not Found")]
    NotFound,
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Service Unavailable: {0}")]
    Unavailable(String),
    #[error("Database Error: {0}")]
    DbError(String),
    #[error("Internal Server Error")]
    InternalError,
}

// Type alias commonly used by route handlers.
pub type ResultResp = Result<Response, ServerError>;

impl ServerError {
    pub fn status(&self) -> u16 {
        match self {
            ServerError::NotFound => 404,
            ServerError::MethodNotAllowed => 405,
            ServerError::BadRequest(_) => 400,
            ServerError::Conflict(_) => 409,
            ServerError::Unavailable(_) => 503,
            ServerError::DbError(_) | ServerError::InternalError => 500,
        }
    }
}

impl From<GeocodeError> for ServerError {
    fn from(err: GeocodeError) -> Self {
        match err {
            GeocodeError::StoreUnavailable(msg) => ServerError::Unavailable(msg),
            GeocodeError::NotFound(_) => ServerError::NotFound,
            GeocodeError::Provider(msg) => ServerError::Unavailable(msg),
            GeocodeError::MapInit(_) => ServerError::InternalError,
        }
    }
}
