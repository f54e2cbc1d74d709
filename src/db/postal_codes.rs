use rusqlite::{params, params_from_iter, Connection};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::db::connection::{init_db, Database};
use crate::domain::postal_code::{normalize, Coordinate};
use crate::errors::ServerError;
use crate::geocoder::GeocodeError;

// Stays well under SQLITE_MAX_VARIABLE_NUMBER on every SQLite build.
const MAX_PARAMS_PER_QUERY: usize = 900;

/// Batch key -> coordinate lookup. Implemented by the SQLite store and by
/// test fakes.
pub trait PostalCodeLookup: Send + Sync {
    /// Returns only the codes that were found, keyed by normalized code.
    fn lookup_many(&self, codes: &HashSet<String>)
        -> Result<HashMap<String, Coordinate>, GeocodeError>;
}

/// Read-only postal code table backed by an SQLite file.
#[derive(Debug, Clone)]
pub struct PostalCodeStore {
    db: Database,
}

impl PostalCodeStore {
    /// Opens an already-imported store. A missing file surfaces as
    /// `StoreUnavailable` on the first query, not here.
    pub fn open(path: impl Into<String>) -> Self {
        Self {
            db: Database::existing(path),
        }
    }

    #[cfg(test)]
    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    pub fn count(&self) -> Result<i64, GeocodeError> {
        self.db
            .with_conn(|conn| {
                conn.query_row("SELECT count(*) FROM postal_codes", [], |r| r.get(0))
                    .map_err(|e| ServerError::DbError(e.to_string()))
            })
            .map_err(unavailable)
    }
}

impl PostalCodeLookup for PostalCodeStore {
    fn lookup_many(
        &self,
        codes: &HashSet<String>,
    ) -> Result<HashMap<String, Coordinate>, GeocodeError> {
        let mut wanted: Vec<String> = codes.iter().filter_map(|c| normalize(c)).collect();
        wanted.sort();
        wanted.dedup();

        if wanted.is_empty() {
            return Ok(HashMap::new());
        }

        self.db
            .with_conn(|conn| {
                let mut found = HashMap::with_capacity(wanted.len());
                for chunk in wanted.chunks(MAX_PARAMS_PER_QUERY) {
                    query_chunk(conn, chunk, &mut found)?;
                }
                Ok(found)
            })
            .map_err(unavailable)
    }
}

fn query_chunk(
    conn: &Connection,
    chunk: &[String],
    found: &mut HashMap<String, Coordinate>,
) -> Result<(), ServerError> {
    let placeholders = vec!["?"; chunk.len()].join(",");
    let sql = format!(
        "SELECT code, latitude, longitude FROM postal_codes WHERE code IN ({placeholders})"
    );

    let mut stmt = conn
        .prepare_cached(&sql)
        .map_err(|e| ServerError::DbError(e.to_string()))?;

    let rows = stmt
        .query_map(params_from_iter(chunk.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                Coordinate::new(row.get(1)?, row.get(2)?),
            ))
        })
        .map_err(|e| ServerError::DbError(e.to_string()))?;

    for r in rows {
        let (code, coord) = r.map_err(|e| ServerError::DbError(e.to_string()))?;
        found.insert(code, coord);
    }
    Ok(())
}

fn unavailable(err: ServerError) -> GeocodeError {
    GeocodeError::StoreUnavailable(err.to_string())
}

/// Outcome of one bulk load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    /// Distinct postal codes written.
    pub records: usize,
    /// Valid lines applied, duplicates included.
    pub lines_applied: usize,
    pub skipped_lines: usize,
}

/// Parses one line of the bulk file.
///
/// Accepts `<prefix> <suffix> <lat> <lng>` or `<code> <lat> <lng>`.
/// Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_record_line(line: &str) -> Result<Option<(String, Coordinate)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    let (raw_code, lat, lng) = match fields.as_slice() {
        [prefix, suffix, lat, lng] => (format!("{prefix}{suffix}"), *lat, *lng),
        [code, lat, lng] => (code.to_string(), *lat, *lng),
        _ => return Err(format!("expected 3 or 4 fields, got {}", fields.len())),
    };

    let code = normalize(&raw_code).ok_or_else(|| format!("invalid postal code {raw_code:?}"))?;
    let lat: f64 = lat.parse().map_err(|_| format!("invalid latitude {lat:?}"))?;
    let lng: f64 = lng.parse().map_err(|_| format!("invalid longitude {lng:?}"))?;

    let coord = Coordinate::new(lat, lng);
    if !coord.is_valid() {
        return Err(format!("coordinate out of range ({lat}, {lng})"));
    }

    Ok(Some((code, coord)))
}

/// Loads a whitespace-delimited postal code file into `db`.
///
/// The load runs in one transaction; later duplicates replace earlier ones.
/// Malformed lines are logged and skipped.
pub fn import_postal_codes(db: &Database, source: &Path) -> Result<ImportSummary, ServerError> {
    let text = std::fs::read_to_string(source)
        .map_err(|e| ServerError::BadRequest(format!("Failed to read {}: {e}", source.display())))?;

    init_db(db)?;

    let source_path = source.display().to_string();
    let started_at = chrono::Utc::now().timestamp();
    let run_id = db.with_conn(|conn| start_import_run(conn, &source_path, started_at))?;

    let result = db.with_conn(|conn| {
        let tx = conn
            .transaction()
            .map_err(|e| ServerError::DbError(e.to_string()))?;

        let mut summary = ImportSummary {
            records: 0,
            lines_applied: 0,
            skipped_lines: 0,
        };
        let mut written = HashSet::new();

        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO postal_codes (code, latitude, longitude)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(code) DO UPDATE SET
                        latitude = excluded.latitude,
                        longitude = excluded.longitude
                    "#,
                )
                .map_err(|e| ServerError::DbError(e.to_string()))?;

            for (idx, line) in text.lines().enumerate() {
                match parse_record_line(line) {
                    Ok(Some((code, coord))) => {
                        stmt.execute(params![code, coord.lat, coord.lng])
                            .map_err(|e| ServerError::DbError(e.to_string()))?;
                        summary.lines_applied += 1;
                        written.insert(code);
                    }
                    Ok(None) => {}
                    Err(reason) => {
                        tracing::warn!(line = idx + 1, %reason, "skipping postal code line");
                        summary.skipped_lines += 1;
                    }
                }
            }
        }

        tx.commit()
            .map_err(|e| ServerError::DbError(e.to_string()))?;
        summary.records = written.len();
        Ok(summary)
    });

    let finished_at = chrono::Utc::now().timestamp();
    record_import_outcome(db, run_id, finished_at, &result);

    let summary = result?;
    tracing::info!(
        source = %source_path,
        records = summary.records,
        lines = summary.lines_applied,
        skipped = summary.skipped_lines,
        "postal code import complete"
    );
    Ok(summary)
}

fn start_import_run(conn: &Connection, source_path: &str, now: i64) -> Result<i64, ServerError> {
    conn.execute(
        "INSERT INTO import_runs (source_path, started_at, success) VALUES (?, ?, 0)",
        params![source_path, now],
    )
    .map_err(|e| ServerError::DbError(e.to_string()))?;
    Ok(conn.last_insert_rowid())
}

/// Bookkeeping only: the import itself already succeeded or failed, so a
/// failure here is logged and reported as `false`.
fn record_import_outcome(
    db: &Database,
    run_id: i64,
    now: i64,
    result: &Result<ImportSummary, ServerError>,
) -> bool {
    match db.with_conn(|conn| finish_import_run(conn, run_id, now, result)) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(run_id, error = %e, "failed to record import run outcome");
            false
        }
    }
}

fn finish_import_run(
    conn: &Connection,
    run_id: i64,
    now: i64,
    result: &Result<ImportSummary, ServerError>,
) -> Result<(), ServerError> {
    let (records, skipped, success, error) = match result {
        Ok(s) => (Some(s.records as i64), Some(s.skipped_lines as i64), true, None),
        Err(e) => (None, None, false, Some(e.to_string())),
    };
    conn.execute(
        "UPDATE import_runs SET finished_at = ?, records = ?, skipped_lines = ?, success = ?, error_message = ? WHERE id = ?",
        params![now, records, skipped, success, error, run_id],
    )
    .map_err(|e| ServerError::DbError(e.to_string()))?;
    Ok(())
}
