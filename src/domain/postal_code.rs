// src/domain/postal_code.rs

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Canadian postal code embedded in free text: `A1A 1A1`, `a1a1a1`, `A1A-1A1`.
static POSTAL_CODE_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([A-Z][0-9][A-Z])[ -]?([0-9][A-Z][0-9])\b")
        .expect("postal code pattern is valid")
});

/// Latitude/longitude pair as stored and returned by the lookup endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Strips whitespace and hyphens and uppercases the result.
///
/// Returns `None` when what remains is not exactly six ASCII alphanumerics;
/// such codes are treated as "not found" everywhere downstream.
pub fn normalize(raw: &str) -> Option<String> {
    let code: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if code.len() == 6 && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(code)
    } else {
        None
    }
}

/// Pulls the first Canadian postal code out of an address line, normalized.
pub fn extract_from_address(address: &str) -> Option<String> {
    let caps = POSTAL_CODE_IN_TEXT.captures(address)?;
    let code = format!("{}{}", &caps[1], &caps[2]);
    normalize(&code)
}

/// `K1A0A6` -> `K1A 0A6`
pub fn display_form(code: &str) -> String {
    if code.len() == 6 && code.is_ascii() {
        format!("{} {}", &code[..3], &code[3..])
    } else {
        code.to_string()
    }
}
