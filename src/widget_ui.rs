//! Serves the embeddable widget client script.

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use crate::shared::state::AppState;

const WIDGET_SCRIPT: &str = include_str!("../static/widget.js");

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/widget.js", get(widget_script))
}

async fn widget_script() -> impl IntoResponse {
    (
        [
            (
                header::CONTENT_TYPE,
                "application/javascript; charset=utf-8",
            ),
            (header::CACHE_CONTROL, "public, max-age=300"),
        ],
        WIDGET_SCRIPT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_reads_its_own_tag_and_speaks_the_widget_protocol() {
        assert!(WIDGET_SCRIPT.contains("data-agent-id"));
        assert!(WIDGET_SCRIPT.contains("/session"));
        assert!(WIDGET_SCRIPT.contains("/chat"));
        assert!(WIDGET_SCRIPT.contains("/user"));
    }
}
