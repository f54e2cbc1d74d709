pub mod errors;
pub mod html;
pub mod json;
pub mod stream;

pub use errors::error_to_response;
pub use html::html_response;
pub use json::{json_response, read_json};
pub use stream::{ndjson_channel, ndjson_response};
