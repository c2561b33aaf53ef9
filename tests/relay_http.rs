//! End-to-end tests over the assembled HTTP surface: routing, extractors,
//! status mapping and the CORS layer, driven through tower without a
//! listening socket.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use chatrelay::llm::NEUTRAL_FALLBACK_PREFIX;
use chatrelay::shared::state::test_support::{
    meta_config, state_with_agent, telegram_config, TestCtx,
};

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(ctx: &TestCtx, request: Request<Body>) -> (StatusCode, Value) {
    let response = chatrelay::app(ctx.app.clone())
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_reports_ok_and_version() {
    let (ctx, _agent) = state_with_agent().await;
    let (status, body) = send(
        &ctx,
        Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].as_str().is_some());
}

#[tokio::test]
async fn widget_session_then_chat_round_trip() {
    let (ctx, agent) = state_with_agent().await;

    let (status, created) = send(
        &ctx,
        json_request(Method::POST, "/session", json!({ "agentId": agent.id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["agent"]["name"], agent.name);
    let session_id: Uuid = serde_json::from_value(created["sessionId"].clone()).unwrap();

    let (status, reply) = send(
        &ctx,
        json_request(
            Method::POST,
            "/chat",
            json!({
                "sessionId": session_id,
                "agentId": agent.id,
                "message": "hello over http",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = reply["reply"].as_str().unwrap();
    assert!(text.starts_with(NEUTRAL_FALLBACK_PREFIX));

    assert_eq!(ctx.store.message_count(session_id).await, 2);
}

#[tokio::test]
async fn unknown_agent_maps_to_404_with_error_body() {
    let (ctx, _agent) = state_with_agent().await;
    let (status, body) = send(
        &ctx,
        json_request(Method::POST, "/session", json!({ "agentId": Uuid::new_v4() })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("agent not found"));
}

#[tokio::test]
async fn chat_against_foreign_session_is_403_over_http() {
    let (ctx, agent) = state_with_agent().await;

    let (_, created) = send(
        &ctx,
        json_request(Method::POST, "/session", json!({ "agentId": agent.id })),
    )
    .await;
    let session_id: Uuid = serde_json::from_value(created["sessionId"].clone()).unwrap();

    let (status, _) = send(
        &ctx,
        json_request(
            Method::POST,
            "/chat",
            json!({
                "sessionId": session_id,
                "agentId": Uuid::new_v4(),
                "message": "hijack",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn telegram_webhook_processes_update_and_replies() {
    let (ctx, agent) = state_with_agent().await;
    ctx.store.insert_config(telegram_config(agent.id)).await;

    let update = json!({
        "update_id": 7,
        "message": {
            "message_id": 1,
            "from": { "id": 321, "is_bot": false, "first_name": "Ada", "username": "ada" },
            "chat": { "id": 654, "type": "private" },
            "date": 0,
            "text": "hi bot"
        }
    });

    let (status, body) = send(
        &ctx,
        json_request(
            Method::POST,
            &format!("/telegram/webhook?agentId={}", agent.id),
            update,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let sent = ctx.telegram.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, 654);
}

#[tokio::test]
async fn meta_handshake_echoes_challenge_as_plain_body() {
    let (ctx, agent) = state_with_agent().await;
    ctx.store.insert_config(meta_config(agent.id)).await;

    let uri = format!(
        "/meta/webhook?agentId={}&hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=challenge-xyz",
        agent.id
    );
    let response = chatrelay::app(ctx.app.clone())
        .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    // Raw challenge, not JSON.
    assert_eq!(&bytes[..], b"challenge-xyz");
}

#[tokio::test]
async fn meta_handshake_rejects_wrong_verify_token() {
    let (ctx, agent) = state_with_agent().await;
    ctx.store.insert_config(meta_config(agent.id)).await;

    let uri = format!(
        "/meta/webhook?agentId={}&hub.mode=subscribe&hub.verify_token=guess&hub.challenge=challenge-xyz",
        agent.id
    );
    let (status, _) = send(
        &ctx,
        Request::builder().uri(&uri).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unsigned_discord_interaction_is_401() {
    let (ctx, agent) = state_with_agent().await;
    ctx.store
        .insert_config(
            chatrelay::shared::state::test_support::discord_config(agent.id, "deadbeef"),
        )
        .await;

    let (status, _) = send(
        &ctx,
        json_request(
            Method::POST,
            &format!("/discord/interactions?agentId={}", agent.id),
            json!({ "type": 1 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn widget_script_is_served_as_javascript() {
    let (ctx, _agent) = state_with_agent().await;
    let response = chatrelay::app(ctx.app.clone())
        .oneshot(
            Request::builder()
                .uri("/widget.js")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(content_type.starts_with("application/javascript"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let script = std::str::from_utf8(&bytes).unwrap();
    assert!(script.contains("data-agent-id"));
}

#[tokio::test]
async fn widget_endpoints_are_cors_open() {
    let (ctx, _agent) = state_with_agent().await;
    let response = chatrelay::app(ctx.app.clone())
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/chat")
                .header(header::ORIGIN, "https://customer.example")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}
