use crate::errors::ServerError;
use crate::templates;
use astra::{Body, Response, ResponseBuilder};
use serde_json::json;

/// Convert a ServerError into a response: JSON for `/api` routes, an HTML
/// page for everything else.
pub fn error_to_response(err: ServerError, path: &str) -> Response {
    let status = err.status();
    if status >= 500 {
        tracing::error!(%path, error = %err, "request failed");
    } else {
        tracing::debug!(%path, error = %err, "request rejected");
    }

    let (content_type, body) = if path.starts_with("/api") {
        (
            mime::APPLICATION_JSON.as_ref(),
            json!({ "error": err.to_string() }).to_string(),
        )
    } else {
        (
            mime::TEXT_HTML_UTF_8.as_ref(),
            templates::error_page(status, &err.to_string()).into_string(),
        )
    };

    ResponseBuilder::new()
        .status(status)
        .header("Content-Type", content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::from("Internal Server Error")))
}
