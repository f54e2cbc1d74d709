pub mod connection;
pub mod postal_codes;

pub use connection::{init_db, Database};
pub use postal_codes::{import_postal_codes, PostalCodeLookup, PostalCodeStore};
