use crate::errors::{ResultResp, ServerError};
use astra::{Body, Request, ResponseBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;

// Bodies larger than this are rejected before parsing.
const MAX_BODY_BYTES: u64 = 4 * 1024 * 1024;

pub fn json_response<T: Serialize>(status: u16, value: &T) -> ResultResp {
    let body = serde_json::to_vec(value).map_err(|_| ServerError::InternalError)?;

    ResponseBuilder::new()
        .status(status)
        .header("Content-Type", mime::APPLICATION_JSON.as_ref())
        .body(Body::from(body))
        .map_err(|_| ServerError::InternalError)
}

/// Reads and decodes a JSON request body.
pub fn read_json<T: DeserializeOwned>(req: &mut Request) -> Result<T, ServerError> {
    let mut raw = Vec::new();
    req.body_mut()
        .reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut raw)
        .map_err(|e| ServerError::BadRequest(format!("Failed to read body: {e}")))?;

    if raw.len() as u64 > MAX_BODY_BYTES {
        return Err(ServerError::BadRequest("Request body too large".into()));
    }

    serde_json::from_slice(&raw).map_err(|e| ServerError::BadRequest(format!("Invalid JSON: {e}")))
}
