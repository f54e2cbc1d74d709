use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::domain::postal_code::Coordinate;
use crate::geocoder::GeocoderSettings;
use crate::map::MapOptions;

const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/search";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub bind: SocketAddr,
    pub workers: usize,
    /// `None` disables the external fallback.
    pub geocoder_url: Option<Url>,
    pub geocoder_timeout: Duration,
    pub geocoder: GeocoderSettings,
    pub map: MapOptions,
}

impl Config {
    /// Reads `PINMAP_*`, `GEOCODER_*`, `GEOCODE_*` and `MAP_*` variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let geocoder_url = match lookup("GEOCODER_URL") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(Url::parse(v.trim()).map_err(|e| invalid("GEOCODER_URL", &v, e))?),
            None => Some(Url::parse(DEFAULT_GEOCODER_URL).map_err(|e| {
                invalid("GEOCODER_URL", DEFAULT_GEOCODER_URL, e)
            })?),
        };

        let defaults = GeocoderSettings::default();
        let map_defaults = MapOptions::default();

        let batch_size: usize = parse_or(&lookup, "GEOCODE_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            return Err(invalid("GEOCODE_BATCH_SIZE", "0", "must be at least 1"));
        }

        Ok(Self {
            db_path: lookup("PINMAP_DB_PATH").unwrap_or_else(|| "postal_codes.sqlite3".to_string()),
            bind: parse_or(&lookup, "PINMAP_BIND", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            workers: parse_or(&lookup, "PINMAP_WORKERS", 8)?,
            geocoder_url,
            geocoder_timeout: Duration::from_millis(parse_or(&lookup, "GEOCODER_TIMEOUT_MS", 5_000)?),
            geocoder: GeocoderSettings {
                batch_size,
                batch_delay: Duration::from_millis(parse_or(
                    &lookup,
                    "GEOCODE_BATCH_DELAY_MS",
                    defaults.batch_delay.as_millis() as u64,
                )?),
                max_concurrent: parse_or(&lookup, "GEOCODE_MAX_CONCURRENT", defaults.max_concurrent)?,
            },
            map: MapOptions {
                center: Coordinate::new(
                    parse_or(&lookup, "MAP_CENTER_LAT", map_defaults.center.lat)?,
                    parse_or(&lookup, "MAP_CENTER_LNG", map_defaults.center.lng)?,
                ),
                zoom: parse_or(&lookup, "MAP_ZOOM", map_defaults.zoom)?,
                ..map_defaults
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| invalid(key, &raw, e)),
        None => Ok(default),
    }
}

fn invalid(key: &'static str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
