use crate::errors::ServerError;
use crate::tests::utils::{body_json, expect_error, init_app_without_store, init_test_app};
use serde_json::json;

#[test]
fn lookup_returns_exact_match() {
    let app = init_test_app(&[]);

    let resp = app
        .post_json("/api/postal-codes/lookup", r#"{"postalCodes": ["K1A 0A6"]}"#)
        .expect("Handler failed");
    assert_eq!(resp.status(), 200);

    let body = body_json(resp);
    assert_eq!(body["results"], json!({ "K1A0A6": { "lat": 45.4236, "lng": -75.7003 } }));
    assert_eq!(body["metadata"]["requested"], 1);
    assert_eq!(body["metadata"]["found"], 1);
    assert_eq!(body["metadata"]["missing"], 0);
}

#[test]
fn lookup_metadata_adds_up() {
    let app = init_test_app(&[]);

    let resp = app
        .post_json(
            "/api/postal-codes/lookup",
            r#"{"postalCodes": ["k1a0a6", "K1A 0A6", "m5v 3l9", "Z9Z 9Z9", "nonsense"]}"#,
        )
        .unwrap();
    let body = body_json(resp);
    let meta = &body["metadata"];

    assert_eq!(meta["requested"], 4);
    assert_eq!(meta["found"], 2);
    assert_eq!(
        meta["found"].as_u64().unwrap() + meta["missing"].as_u64().unwrap(),
        meta["requested"].as_u64().unwrap()
    );
    assert!(meta["duration_ms"].is_u64());
    assert!(body["results"].get("Z9Z9Z9").is_none());
}

#[test]
fn lookup_never_calls_provider() {
    let app = init_test_app(&[("Z9Z9Z9", 1.0, 1.0)]);
    app.post_json("/api/postal-codes/lookup", r#"{"postalCodes": ["Z9Z9Z9"]}"#)
        .unwrap();
    assert_eq!(app.provider_calls(), 0);
}

#[test]
fn geocode_uses_store_then_provider() {
    let app = init_test_app(&[("V6B1A1", 49.2827, -123.1207)]);

    let resp = app
        .post_json(
            "/api/postal-codes/geocode",
            r#"{"postalCodes": ["K1A 0A6", "v6b 1a1", "Z9Z 9Z9", "nonsense"]}"#,
        )
        .expect("Handler failed");
    assert_eq!(resp.status(), 200);

    let body = body_json(resp);
    assert_eq!(body["results"]["V6B1A1"], json!({ "lat": 49.2827, "lng": -123.1207 }));
    let meta = &body["metadata"];
    assert_eq!(meta["requested"], 4);
    assert_eq!(meta["found"], 2);
    assert_eq!(meta["missing"], 2);
    assert_eq!(meta["batches"], 1);
    assert_eq!(meta["from_store"], 1);
    assert_eq!(meta["from_provider"], 1);
    // the invalid code never reaches the provider
    assert_eq!(app.provider_calls(), 2);
}

#[test]
fn empty_lookup_returns_empty_results() {
    // Even without a store: nothing to look up, nothing to fail.
    let app = init_app_without_store();

    let resp = app
        .post_json("/api/postal-codes/lookup", r#"{"postalCodes": []}"#)
        .unwrap();
    let body = body_json(resp);
    assert_eq!(body["results"], json!({}));
    assert_eq!(body["metadata"]["requested"], 0);
}

#[test]
fn non_array_input_is_a_client_error() {
    let app = init_test_app(&[]);

    for bad in [
        r#"{"postalCodes": "K1A 0A6"}"#,
        r#"{"postalCodes": {"a": 1}}"#,
        r#"{"codes": []}"#,
        "not json",
    ] {
        let err = expect_error(app.post_json("/api/postal-codes/lookup", bad));
        assert!(matches!(err, ServerError::BadRequest(_)), "{bad}");
        assert_eq!(err.status(), 400);
    }
}

#[test]
fn missing_store_is_service_unavailable() {
    let app = init_app_without_store();

    let err = expect_error(
        app.post_json("/api/postal-codes/lookup", r#"{"postalCodes": ["K1A 0A6"]}"#),
    );
    assert_eq!(err.status(), 503);
}

#[test]
fn health_reports_store_size() {
    let app = init_test_app(&[]);
    let body = body_json(app.get("/health").unwrap());
    assert_eq!(body["status"], "ok");
    assert_eq!(body["postal_codes"], 3);

    let degraded = init_app_without_store().get("/health").unwrap();
    assert_eq!(degraded.status(), 503);
}

#[test]
fn wrong_method_and_unknown_route() {
    let app = init_test_app(&[]);
    assert!(matches!(
        expect_error(app.get("/api/postal-codes/lookup")),
        ServerError::MethodNotAllowed
    ));
    assert!(matches!(expect_error(app.get("/nope")), ServerError::NotFound));
}
