//! chatrelay - multi-channel conversational relay.
//!
//! Accepts inbound messages from heterogeneous channels (web widget,
//! Telegram, Discord, Messenger/WhatsApp), normalizes them into a
//! channel-agnostic session/message model, assembles bounded generation
//! context and delivers replies back over each channel's own transport.

use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod channels;
pub mod config;
pub mod error;
pub mod kb;
pub mod llm;
pub mod session;
pub mod shared;
pub mod store;
pub mod widget_ui;

use shared::state::AppState;

/// Assemble the full HTTP surface. CORS is permissive across the board:
/// the widget endpoints are embedded on arbitrary origins and the webhook
/// surfaces are called server-to-server where CORS is irrelevant.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(channels::widget::configure())
        .merge(channels::telegram::configure())
        .merge(channels::discord::configure())
        .merge(channels::meta::configure())
        .merge(widget_ui::configure())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(preflight_no_content))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Preflight answers carry no body, so they go out as 204 instead of the
/// CORS layer's default 200.
async fn preflight_no_content(request: Request, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
