use crate::app::AppState;
use crate::config::Config;
use crate::db::{import_postal_codes, Database, PostalCodeStore};
use crate::domain::postal_code::Coordinate;
use crate::errors::{ResultResp, ServerError};
use crate::geocoder::{GeocodeError, GeocodeProvider};
use crate::router::handle;
use astra::{Body, Response};
use http::{Method, Request};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const STORE_FIXTURE: &str = "\
K1A 0A6 45.4236 -75.7003
M5V 3L9 43.6426 -79.3871
H2Y 1C6 45.5048 -73.5562
";

/// Provider fake answering from a fixed table, counting calls.
#[derive(Default)]
pub struct TableProvider {
    pub answers: HashMap<String, Coordinate>,
    pub calls: Mutex<Vec<String>>,
}

impl GeocodeProvider for TableProvider {
    fn geocode_postal_code(&self, code: &str) -> Result<Coordinate, GeocodeError> {
        self.calls.lock().unwrap().push(code.to_string());
        self.answers
            .get(code)
            .copied()
            .ok_or_else(|| GeocodeError::NotFound(code.to_string()))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub provider: Arc<TableProvider>,
    _dir: TempDir,
}

pub fn test_config() -> Config {
    let mut config = Config::from_lookup(|_| None).expect("default config");
    config.geocoder.batch_delay = Duration::ZERO;
    config
}

/// App backed by a fresh store loaded with [`STORE_FIXTURE`].
pub fn init_test_app(provider_answers: &[(&str, f64, f64)]) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let data = dir.path().join("codes.txt");
    std::fs::File::create(&data)
        .and_then(|mut f| f.write_all(STORE_FIXTURE.as_bytes()))
        .expect("write fixture");

    let db = Database::new(dir.path().join("store.sqlite3").to_string_lossy());
    import_postal_codes(&db, &data).unwrap_or_else(|e| panic!("Store import failed: {e}"));

    app_with_store(dir, PostalCodeStore::from_database(db), provider_answers)
}

/// App whose store file does not exist.
pub fn init_app_without_store() -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = PostalCodeStore::open(dir.path().join("missing.sqlite3").to_string_lossy());
    app_with_store(dir, store, &[])
}

fn app_with_store(dir: TempDir, store: PostalCodeStore, answers: &[(&str, f64, f64)]) -> TestApp {
    let provider = Arc::new(TableProvider {
        answers: answers
            .iter()
            .map(|(c, lat, lng)| (c.to_string(), Coordinate::new(*lat, *lng)))
            .collect(),
        calls: Mutex::new(Vec::new()),
    });
    let state = AppState::new(store, Some(provider.clone()), &test_config());
    TestApp {
        state,
        provider,
        _dir: dir,
    }
}

impl TestApp {
    pub fn get(&self, uri: &str) -> ResultResp {
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        handle(req, &self.state)
    }

    pub fn post_json(&self, uri: &str, body: &str) -> ResultResp {
        let req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        handle(req, &self.state)
    }

    pub fn provider_calls(&self) -> usize {
        self.provider.calls.lock().unwrap().len()
    }
}

pub fn body_string(resp: Response) -> String {
    let mut body = String::new();
    resp.into_body().reader().read_to_string(&mut body).unwrap();
    body
}

pub fn body_json(resp: Response) -> serde_json::Value {
    serde_json::from_str(&body_string(resp)).expect("response is JSON")
}

/// The error a handler returned; panics on success.
pub fn expect_error(result: ResultResp) -> ServerError {
    match result {
        Ok(resp) => panic!("expected an error, got status {}", resp.status()),
        Err(e) => e,
    }
}
