use crate::app::AppState;
use crate::domain::postal_code::Coordinate;
use crate::errors::ServerError;
use crate::geocoder::{GeocodeError, GeocodeProvider};
use crate::map::{MapOptions, MapState};
use crate::router::{handle, MAP_CONTAINER_ID};
use crate::session::SearchGenerations;
use crate::tests::utils::{body_json, body_string, expect_error, init_test_app, test_config};
use astra::Body;
use http::{Method, Request};
use serde_json::json;
use std::sync::{Arc, OnceLock};

/// Answers every code, but first starts another search on whichever map
/// it was pointed at, as a second browser tab would.
#[derive(Default)]
struct InterruptingProvider {
    target: OnceLock<SearchGenerations>,
}

impl GeocodeProvider for InterruptingProvider {
    fn geocode_postal_code(&self, _code: &str) -> Result<Coordinate, GeocodeError> {
        if let Some(searches) = self.target.get() {
            searches.begin();
        }
        Ok(Coordinate::new(49.2827, -123.1207))
    }
}

fn interrupted_app(target_container: &str) -> (crate::tests::utils::TestApp, AppState) {
    let app = init_test_app(&[]);
    let provider = Arc::new(InterruptingProvider::default());
    let state = AppState::new(app.state.store.clone(), Some(provider.clone()), &test_config());

    let searches = state
        .maps()
        .mount(target_container, MapOptions::default(), |_| {})
        .unwrap()
        .searches()
        .clone();
    let _ = provider.target.set(searches);
    (app, state)
}

fn post_map(state: &AppState, body: serde_json::Value) -> Result<astra::Response, ServerError> {
    let req = Request::builder()
        .method(Method::POST)
        .uri("/map")
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    handle(req, state)
}

fn vancouver_listing() -> serde_json::Value {
    json!({ "listingKey": "vancouver", "address": "V6B 4Y8", "price": 900000 })
}

#[test]
fn map_page_renders_guarded_container() {
    let app = init_test_app(&[]);

    let resp = app.get("/map").expect("Handler failed");
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("Content-Type").unwrap().to_str().unwrap(),
        "text/html; charset=utf-8"
    );

    let body = body_string(resp);
    assert!(body.contains(r#"id="listing-map""#));
    assert!(body.contains("data-pinmap-container"));
    assert!(body.contains("el._leaflet_id"));
    assert!(body.contains("/map/events"));
}

#[test]
fn posted_listings_are_drawn_and_listed() {
    let app = init_test_app(&[]);
    let listings = json!({
        "listings": [
            { "listingKey": "ottawa", "address": "K1A 0A6", "price": 1250000 },
            { "listingKey": "toronto", "address": "M5V 3L9", "price": 650000 }
        ]
    });

    let body = body_string(app.post_json("/map", &listings.to_string()).unwrap());
    assert!(body.contains("2 of 2 listings in view"));
    assert!(body.contains("$1.3M"));
    assert!(body.contains(r#"data-listing-key="toronto""#));
}

#[test]
fn page_load_keeps_markers_already_drawn() {
    let app = init_test_app(&[]);
    let listings = json!({
        "listings": [{ "listingKey": "ottawa", "address": "K1A 0A6", "price": 1250000 }]
    });
    app.post_json("/map", &listings.to_string()).unwrap();
    let redraws = app.state.maps().get(MAP_CONTAINER_ID).unwrap().redraw_count();

    let body = body_string(app.get("/map").unwrap());

    assert!(body.contains("1 of 1 listings in view"));
    let maps = app.state.maps();
    let view = maps.get(MAP_CONTAINER_ID).unwrap();
    assert_eq!(view.drawn_markers().len(), 1);
    assert_eq!(view.redraw_count(), redraws);
}

#[test]
fn repeated_page_loads_reuse_the_bound_view() {
    let app = init_test_app(&[]);

    for _ in 0..3 {
        app.get("/map").unwrap();
    }

    let maps = app.state.maps();
    assert_eq!(maps.len(), 1);
    let view = maps.get(MAP_CONTAINER_ID).unwrap();
    assert_eq!(view.state(), MapState::Ready);
    // drawn once on init, page loads do not redraw
    assert_eq!(view.redraw_count(), 1);
}

#[test]
fn overtaken_render_is_rejected_without_touching_the_view() {
    let (_app, state) = interrupted_app(MAP_CONTAINER_ID);

    let err = expect_error(post_map(&state, json!({ "listings": [vancouver_listing()] })));

    assert!(matches!(err, ServerError::Conflict(_)));
    assert_eq!(err.status(), 409);
    let maps = state.maps();
    assert!(maps.get(MAP_CONTAINER_ID).unwrap().drawn_markers().is_empty());
}

#[test]
fn searches_on_other_containers_do_not_interfere() {
    let (_app, state) = interrupted_app("other-tab");

    let resp = post_map(
        &state,
        json!({ "listings": [vancouver_listing()], "container": "my-tab" }),
    )
    .expect("render on its own container should not be cancelled");
    assert_eq!(resp.status(), 200);

    let body = body_string(resp);
    assert!(body.contains(r#"id="my-tab""#));
    let maps = state.maps();
    assert_eq!(maps.get("my-tab").unwrap().drawn_markers().len(), 1);
    assert!(maps.get("other-tab").unwrap().drawn_markers().is_empty());
}

#[test]
fn invalid_container_ids_are_rejected() {
    let app = init_test_app(&[]);

    let err = expect_error(app.get("/map?container=%3Cscript%3E"));
    assert!(matches!(err, ServerError::BadRequest(_)));

    let long = "x".repeat(65);
    let err = expect_error(app.get(&format!("/map?container={long}")));
    assert!(matches!(err, ServerError::BadRequest(_)));
}

#[test]
fn view_events_track_the_client_map() {
    let app = init_test_app(&[]);
    let listings = json!({
        "listings": [
            { "listingKey": "ottawa", "address": "K1A 0A6", "price": 1250000 },
            { "listingKey": "toronto", "address": "M5V 3L9", "price": 650000 }
        ],
        "container": "search"
    });
    app.post_json("/map", &listings.to_string()).unwrap();

    let moved = json!({
        "container": "search",
        "event": { "type": "moveend", "center": { "lat": 45.4236, "lng": -75.7003 }, "zoom": 14, "width": 800, "height": 600 }
    });
    let body = body_json(app.post_json("/map/events", &moved.to_string()).unwrap());
    let keys: Vec<&str> = body["markers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["listingKey"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["ottawa"]);
    assert!(body["bounds"]["north"].as_f64().unwrap() > 45.4236);

    let click = json!({ "container": "search", "event": { "type": "click", "listingKey": "toronto" } });
    let body = body_json(app.post_json("/map/events", &click.to_string()).unwrap());
    assert_eq!(body, json!({ "listingKey": "toronto", "drawn": true }));

    let dispose = json!({ "container": "search", "event": { "type": "dispose" } });
    let body = body_json(app.post_json("/map/events", &dispose.to_string()).unwrap());
    assert_eq!(body["disposed"], true);
    assert!(app.state.maps().get("search").is_none());

    // events for a container that is gone
    let err = expect_error(app.post_json("/map/events", &click.to_string()));
    assert!(matches!(err, ServerError::NotFound));
}

#[test]
fn poisoned_registry_lock_is_recovered() {
    let app = init_test_app(&[]);
    let maps = &app.state.maps;

    std::thread::scope(|s| {
        let crashed = s
            .spawn(move || {
                let _guard = maps.lock().unwrap();
                panic!("handler crashed while holding the map registry");
            })
            .join();
        assert!(crashed.is_err());
    });
    assert!(maps.is_poisoned());

    let resp = app.get("/map").expect("map page after a crashed handler");
    assert_eq!(resp.status(), 200);
    assert!(!maps.is_poisoned());
}
