use crate::errors::ServerError;
use crate::tests::utils::{
    body_json, body_string, expect_error, init_app_without_store, init_test_app,
};
use serde_json::json;

#[test]
fn markers_mix_store_provider_and_pre_geocoded() {
    let app = init_test_app(&[("V6B1A1", 49.2827, -123.1207)]);

    let listings = json!({
        "listings": [
            { "listingKey": "ottawa", "address": "80 Wellington St, Ottawa ON K1A 0A6", "price": 1250000 },
            { "ListingKey": "vancouver", "UnparsedAddress": "1 Main St, Vancouver BC V6B 1A1", "ListPrice": 650000 },
            { "listingKey": "pinned", "address": "somewhere", "latitude": 45.0, "longitude": -75.0, "price": 950 },
            { "listingKey": "nowhere", "address": "no postal code here", "price": 1 }
        ]
    });

    let resp = app
        .post_json("/api/markers", &listings.to_string())
        .expect("Handler failed");
    assert_eq!(resp.status(), 200);
    let body = body_json(resp);

    let markers = body["markers"].as_array().unwrap();
    let keys: Vec<&str> = markers.iter().map(|m| m["listingKey"].as_str().unwrap()).collect();
    assert_eq!(keys, vec!["ottawa", "vancouver", "pinned"]);

    assert_eq!(markers[0]["label"], "$1.3M");
    assert_eq!(markers[1]["label"], "$650K");
    assert_eq!(markers[2]["label"], "$950");
    assert_eq!(markers[2]["position"], json!({ "lat": 45.0, "lng": -75.0 }));

    assert_eq!(body["metadata"]["listings"], 4);
    assert_eq!(body["metadata"]["markers"], 3);
    assert_eq!(body["metadata"]["excluded"], 1);

    // only the store miss went out to the provider
    assert_eq!(app.provider_calls(), 1);
}

#[test]
fn pre_geocoded_listings_touch_nothing() {
    let app = init_app_without_store();

    let resp = app
        .post_json(
            "/api/markers",
            r#"{"listings": [{"listingKey": "a", "latitude": 45.0, "longitude": -75.0, "price": 1}]}"#,
        )
        .unwrap();
    let body = body_json(resp);
    assert_eq!(body["metadata"]["markers"], 1);
    assert_eq!(app.provider_calls(), 0);
}

#[test]
fn store_outage_falls_back_to_provider() {
    let app = init_app_without_store();

    let resp = app
        .post_json(
            "/api/markers",
            r#"{"listings": [{"listingKey": "a", "address": "K1A 0A6", "price": 1}]}"#,
        )
        .unwrap();
    let body = body_json(resp);
    // provider fake knows nothing, so the listing is dropped but nothing fails
    assert_eq!(body["metadata"]["markers"], 0);
    assert_eq!(app.provider_calls(), 1);
}

#[test]
fn visible_filter_uses_bounds() {
    let app = init_test_app(&[]);

    let request = json!({
        "markers": [
            { "listingKey": "in", "position": { "lat": 45.42, "lng": -75.70 }, "price": 1, "address": "", "label": "$1" },
            { "listingKey": "out", "position": { "lat": 43.65, "lng": -79.38 }, "price": 1, "address": "", "label": "$1" },
            { "listingKey": "unplaced", "position": null, "price": 1, "address": "" }
        ],
        "bounds": { "north": 45.5, "south": 45.3, "east": -75.6, "west": -75.8 }
    });

    let body = body_json(
        app.post_json("/api/markers/visible", &request.to_string())
            .unwrap(),
    );
    let keys: Vec<&str> = body["markers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["listingKey"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["in"]);
}

#[test]
fn inverted_bounds_are_rejected() {
    let app = init_test_app(&[]);
    let request = json!({
        "markers": [],
        "bounds": { "north": 45.3, "south": 45.5, "east": -75.6, "west": -75.8 }
    });
    let err = expect_error(app.post_json("/api/markers/visible", &request.to_string()));
    assert!(matches!(err, ServerError::BadRequest(_)));
}

#[test]
fn stream_sends_partial_markers_then_the_full_set() {
    let app = init_test_app(&[("V6B1A1", 49.2827, -123.1207)]);
    let listings = json!({
        "listings": [
            { "listingKey": "ottawa", "address": "K1A 0A6", "price": 1250000 },
            { "listingKey": "vancouver", "address": "V6B 1A1", "price": 650000 },
            { "listingKey": "pinned", "latitude": 45.0, "longitude": -75.0, "price": 950 }
        ]
    });

    let resp = app
        .post_json("/api/markers/stream", &listings.to_string())
        .expect("Handler failed");
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("Content-Type").unwrap().to_str().unwrap(),
        "application/x-ndjson"
    );

    let lines: Vec<serde_json::Value> = body_string(resp)
        .lines()
        .map(|l| serde_json::from_str(l).expect("each line is JSON"))
        .collect();
    let keys = |line: &serde_json::Value| -> Vec<String> {
        line["markers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["listingKey"].as_str().unwrap().to_string())
            .collect()
    };

    assert_eq!(lines.len(), 3);
    // pre-geocoded listings go out before any lookup finishes
    assert_eq!(lines[0]["type"], "partial");
    assert_eq!(keys(&lines[0]), vec!["pinned"]);
    assert_eq!(lines[1]["type"], "partial");
    assert_eq!(keys(&lines[1]), vec!["ottawa", "vancouver", "pinned"]);
    assert_eq!(lines[2]["type"], "complete");
    assert_eq!(keys(&lines[2]), vec!["ottawa", "vancouver", "pinned"]);
    assert_eq!(lines[2]["metadata"]["excluded"], 0);
}
