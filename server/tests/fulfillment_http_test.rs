//! HTTP Integration Tests for the Fulfillment Webhook
//!
//! - POST /cx/fulfillment acknowledges at once and clears the action's form
//! - redeliveries of a message id are acknowledged but not re-run
//! - the webhook key is enforced when configured
//!
//! Run with: `cargo test --test fulfillment_http_test -- --nocapture`

mod helpers;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use helpers::{body_to_json, fulfillment_body, SseReader, TestApp, SEEDED_CASE};
use parley_server::auth::API_KEY_HEADER;
use parley_server::config::Config;
use parley_server::events::EventBus;
use serde_json::{json, Value};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_accepts_and_clears_form_parameters() {
    let app = TestApp::new();
    let session_id = Uuid::new_v4();

    let response = app
        .post_json(
            "/cx/fulfillment",
            &fulfillment_body("Lookup", session_id, json!({ "id": SEEDED_CASE, "turnId": "turn-a" })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response).await;
    assert_eq!(body["fulfillmentResponse"]["messages"], json!([]));
    assert_eq!(body["sessionInfo"]["parameters"], json!({ "id": null }));
    assert_eq!(body["payload"]["accepted"], true);
    assert_eq!(body["payload"]["turnId"], "turn-a");
    assert!(body["payload"].get("duplicate").is_none());

    app.settle().await;
}

#[tokio::test]
async fn test_generates_turn_id_when_absent() {
    let app = TestApp::new();
    let session_id = Uuid::new_v4();

    let body = body_to_json(
        app.post_json(
            "/cx/fulfillment",
            &fulfillment_body("Lookup", session_id, json!({ "id": SEEDED_CASE })),
        )
        .await,
    )
    .await;

    let turn_id = body["payload"]["turnId"].as_str().unwrap();
    assert!(Uuid::parse_str(turn_id).is_ok(), "generated turn id: {turn_id}");

    app.settle().await;
    let last = app.bus.last_turn(session_id).await.unwrap();
    assert_eq!(last.as_deref(), Some(turn_id));
}

#[tokio::test]
async fn test_turn_progress_reaches_the_stream() {
    let app = TestApp::new();
    let session_id = Uuid::new_v4();

    let mut reader = SseReader::new(app.open_stream(session_id).await);
    let ready = reader.next_event(WAIT).await.expect("ready");
    assert_eq!(ready.event.as_deref(), Some("ready"));
    app.wait_for_subscriber(session_id).await;

    app.post_json(
        "/cx/fulfillment",
        &fulfillment_body("Lookup", session_id, json!({ "id": SEEDED_CASE, "turnId": "t-1" })),
    )
    .await;

    let frames = reader.until_done(WAIT).await;
    let names: Vec<&str> = frames.iter().filter_map(|f| f.event.as_deref()).collect();
    assert_eq!(names.last(), Some(&"done"));

    let finals: Vec<Value> = frames
        .iter()
        .map(helpers::SseFrame::json)
        .filter(|v| v["type"] == "message" && v["phase"] == "final")
        .collect();
    assert_eq!(finals.len(), 1);
    assert_eq!(
        finals[0]["text"],
        format!("El expediente {SEEDED_CASE} está en estado: En revisión.")
    );
    for frame in &frames {
        let value = frame.json();
        assert_eq!(value["sessionId"], session_id.to_string());
        assert_eq!(value["turnId"], "t-1");
    }
}

#[tokio::test]
async fn test_unknown_tag_is_accepted_and_fails_on_stream() {
    let app = TestApp::new();
    let session_id = Uuid::new_v4();

    let mut reader = SseReader::new(app.open_stream(session_id).await);
    reader.next_event(WAIT).await.expect("ready");
    app.wait_for_subscriber(session_id).await;

    let response = app
        .post_json("/cx/fulfillment", &fulfillment_body("Teleport", session_id, json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response).await;
    assert_eq!(body["payload"]["accepted"], true);
    assert_eq!(body["sessionInfo"]["parameters"], json!({}));

    let frames = reader.until_done(WAIT).await;
    assert_eq!(frames.len(), 2);
    let error = frames[0].json();
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "UNKNOWN_TAG");
    assert_eq!(error["retryable"], false);
}

#[tokio::test]
async fn test_redelivered_message_runs_once() {
    let app = TestApp::new();
    let session_id = Uuid::new_v4();
    let body = fulfillment_body(
        "CreateComplaint",
        session_id,
        json!({
            "messageId": "wamid.HBgM",
            "channelUserId": "citizen-1",
            "nombre": "Ana Pérez",
            "cedula": "1-0234-0567",
            "ubicacion": "San José",
            "descripcion": "Basura acumulada",
        }),
    );

    let first = body_to_json(app.post_json("/cx/fulfillment", &body).await).await;
    let second = body_to_json(app.post_json("/cx/fulfillment", &body).await).await;
    app.settle().await;

    assert!(first["payload"].get("duplicate").is_none());
    assert_eq!(second["payload"]["accepted"], true);
    assert_eq!(second["payload"]["duplicate"], true);
    assert_eq!(app.backend.complaints().len(), 1);
}

#[tokio::test]
async fn test_rejects_missing_or_malformed_session_id() {
    let app = TestApp::new();

    let missing = app
        .post_json(
            "/cx/fulfillment",
            &json!({ "fulfillmentInfo": { "tag": "Lookup" }, "sessionInfo": { "parameters": {} } }),
        )
        .await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_to_json(missing).await["error"], "VALIDATION_ERROR");

    let malformed = app
        .post_json(
            "/cx/fulfillment",
            &json!({
                "fulfillmentInfo": { "tag": "Lookup" },
                "sessionInfo": { "parameters": { "sessionId": "not-a-uuid" } }
            }),
        )
        .await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.state.dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn test_webhook_key_enforced_when_configured() {
    let config = Config {
        webhook_api_key: Some("cx-webhook-key".into()),
        ..Config::default_for_test()
    };
    let app = TestApp::with_config(config);
    let body = fulfillment_body("Lookup", Uuid::new_v4(), json!({ "id": SEEDED_CASE }));

    let without_key = app
        .oneshot(
            TestApp::request(Method::POST, "/cx/fulfillment")
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(without_key.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_to_json(without_key).await["error"], "INVALID_API_KEY");

    let wrong_key = app
        .oneshot(
            TestApp::request(Method::POST, "/cx/fulfillment")
                .header("Content-Type", "application/json")
                .header(API_KEY_HEADER, "guess")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(wrong_key.status(), StatusCode::UNAUTHORIZED);

    let with_key = app.post_json("/cx/fulfillment", &body).await;
    assert_eq!(with_key.status(), StatusCode::OK);
    app.settle().await;
}
