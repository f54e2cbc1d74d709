pub mod listing;
pub mod marker;
pub mod postal_code;
