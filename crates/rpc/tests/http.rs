//! HTTP boundary tests, driving the router without a socket.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Duration;
use coldsign_codec::{PayloadCodec, SignedBundle, SignedSubmission};
use coldsign_coordinator::{Coordinator, CoordinatorConfig};
use coldsign_core::{ManualClock, SignatureScheme};
use coldsign_rpc::{commands, create_router, AppState};
use coldsign_verifier::DeviceKey;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
    keys: Vec<(&'static str, DeviceKey)>,
}

fn app() -> TestApp {
    let clock = Arc::new(ManualClock::at_epoch());
    let coordinator =
        Coordinator::in_memory(CoordinatorConfig::default(), clock.clone()).unwrap();
    TestApp {
        router: create_router(AppState::new(Arc::new(coordinator))),
        clock,
        keys: ["alice", "bob", "carol"]
            .into_iter()
            .map(|id| (id, DeviceKey::generate(SignatureScheme::Ed25519)))
            .collect(),
    }
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn creation_body(app: &TestApp, required: u32, ttl_secs: u64) -> Value {
    json!({
        "kind": "rebalancing",
        "transactionBundles": [{
            "id": "sol-1",
            "assetSymbol": "SOL",
            "amount": "1250.5",
            "fee": "0.000005",
            "fromAddress": "ColdVau1tSo1",
            "toAddress": "HotWa11etSo1",
            "unsignedPayload": "AQABAgMEBQYHCAkK"
        }],
        "signers": app.keys.iter().map(|(id, key)| json!({
            "id": id,
            "displayName": id.to_uppercase(),
            "publicKey": key.public_key_hex(),
        })).collect::<Vec<_>>(),
        "requiredSignatures": required,
        "ttlSecs": ttl_secs,
        "requestedBy": { "id": "rebalancer", "name": "Treasury engine" }
    })
}

async fn create(app: &TestApp, required: u32, ttl_secs: u64) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/signing-requests",
        Some(creation_body(app, required, ttl_secs)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn outbound_frame(app: &TestApp, id: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        &format!("/signing-requests/{id}/outbound-payload"),
        Some(json!({ "id": "ops-1", "name": "Operator" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]["frame"].as_str().unwrap().to_string()
}

fn device_sign(app: &TestApp, frame: &str, signer: &str, key_of: &str) -> String {
    let key = &app.keys.iter().find(|(id, _)| *id == key_of).unwrap().1;
    commands::sign_frame(
        &PayloadCodec::default(),
        frame,
        key,
        signer,
        vec![SignedBundle {
            bundle_id: "sol-1".into(),
            signed_payload: format!("signed-by-{signer}"),
        }],
    )
    .unwrap()
}

async fn submit(app: &TestApp, id: &str, frame: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        &format!("/signing-requests/{id}/signatures"),
        Some(json!({ "payload": frame })),
    )
    .await
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["requests"], 0);
}

#[tokio::test]
async fn create_and_fetch_request() {
    let app = app();
    let id = create(&app, 2, 3600).await;
    assert!(id.starts_with("SR-"));

    let (status, body) = send(&app, "GET", &format!("/signing-requests/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["obtainedSignatures"], 0);
    assert_eq!(body["data"]["signers"][0]["scheme"], "ed25519");
}

#[tokio::test]
async fn invalid_creation_is_rejected() {
    let app = app();

    let (status, body) = send(
        &app,
        "POST",
        "/signing-requests",
        Some(creation_body(&app, 4, 3600)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = send(
        &app,
        "POST",
        "/signing-requests",
        Some(json!({ "kind": "rebalancing" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (status, _) = send(&app, "GET", "/signing-requests", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let app = app();
    for (method, uri) in [
        ("GET", "/signing-requests/SR-404"),
        ("GET", "/signing-requests/SR-404/audit"),
        ("POST", "/signing-requests/SR-404/outbound-payload"),
    ] {
        let (status, body) = send(&app, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(body["code"], "not_found");
    }
}

#[tokio::test]
async fn two_of_three_over_http() {
    let app = app();
    let id = create(&app, 2, 3600).await;
    let frame = outbound_frame(&app, &id).await;

    let (status, body) = submit(&app, &id, &device_sign(&app, &frame, "alice", "alice")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "partial");

    let (status, body) = submit(&app, &id, &device_sign(&app, &frame, "alice", "alice")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "duplicate_signature");

    let (status, body) = submit(&app, &id, &device_sign(&app, &frame, "bob", "bob")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["obtainedSignatures"], 2);

    let (status, body) = submit(&app, &id, &device_sign(&app, &frame, "carol", "carol")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_finalized");

    let (_, body) = send(&app, "GET", &format!("/signing-requests/{id}/audit"), None).await;
    let actions: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(
        actions,
        vec![
            "created",
            "qr_generated",
            "signature_accepted",
            "signature_rejected",
            "signature_accepted",
            "completed",
            "signature_rejected",
        ]
    );

    let (_, body) = send(&app, "GET", "/signing-requests/stats", None).await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["by_status"]["completed"], 1);
}

#[tokio::test]
async fn late_submission_is_gone() {
    let app = app();
    let id = create(&app, 2, 60).await;
    let frame = outbound_frame(&app, &id).await;
    app.clock.advance(Duration::seconds(61));

    let (status, body) = submit(&app, &id, &device_sign(&app, &frame, "alice", "alice")).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "expired_request");

    let (_, body) = send(&app, "GET", &format!("/signing-requests/{id}"), None).await;
    assert_eq!(body["data"]["status"], "expired");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/signing-requests/{id}/outbound-payload"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_finalized");
}

#[tokio::test]
async fn cancel_requires_reason() {
    let app = app();
    let id = create(&app, 2, 3600).await;
    let uri = format!("/signing-requests/{id}/cancel");

    let (status, body) = send(&app, "POST", &uri, Some(json!({ "actorId": "ops-7" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = send(
        &app,
        "POST",
        &uri,
        Some(json!({ "reason": "duplicate of an earlier request", "actorId": "ops-7" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");
    assert_eq!(body["data"]["cancellation"]["actorId"], "ops-7");

    let (status, body) = send(
        &app,
        "POST",
        &uri,
        Some(json!({ "reason": "again", "actorId": "ops-7" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_finalized");
}

#[tokio::test]
async fn rejected_submissions_map_to_status_codes() {
    let app = app();
    let id = create(&app, 2, 3600).await;
    let frame = outbound_frame(&app, &id).await;

    // bob's device key, alice's name
    let (status, body) = submit(&app, &id, &device_sign(&app, &frame, "alice", "bob")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "verification_failed");

    let codec = PayloadCodec::default();
    let stranger = codec
        .encode_submission(&SignedSubmission::new(
            &id,
            "eve",
            "ab".repeat(64),
            vec![SignedBundle {
                bundle_id: "sol-1".into(),
                signed_payload: "signed".into(),
            }],
            None,
        ))
        .unwrap();
    let (status, body) = submit(&app, &id, &stranger).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "unknown_signer");

    let (status, body) = submit(&app, &id, "CSS1:not-a-frame!").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "malformed_payload");

    let (_, body) = send(&app, "GET", &format!("/signing-requests/{id}"), None).await;
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["obtainedSignatures"], 0);
}

#[tokio::test]
async fn listing_filters_by_status() {
    let app = app();
    let first = create(&app, 2, 3600).await;
    app.clock.advance(Duration::seconds(1));
    let second = create(&app, 2, 3600).await;
    send(
        &app,
        "POST",
        &format!("/signing-requests/{first}/cancel"),
        Some(json!({ "reason": "superseded", "actorId": "ops-1" })),
    )
    .await;

    let (_, body) = send(&app, "GET", "/signing-requests", None).await;
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["items"][0]["id"], second.as_str());

    let (_, body) = send(&app, "GET", "/signing-requests?status=cancelled", None).await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["id"], first.as_str());

    let (status, _) = send(&app, "GET", "/signing-requests?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
