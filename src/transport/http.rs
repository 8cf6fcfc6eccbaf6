//! HTTP routes: console assets, WebSocket upgrade, script listing, console
//! settings, health

use super::{ws::ws_upgrade, AppState};
use crate::dispatcher::AllowedScript;
use crate::protocol::now_rfc3339;
use axum::{
    extract::State,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

const INDEX_HTML: &str = include_str!("../../assets/index.html");
const CONSOLE_JS: &str = include_str!("../../assets/console.js");

/// Health payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthStatus {
    status: &'static str,
    uptime_seconds: u64,
    active_connections: usize,
    timestamp: String,
}

/// Settings the browser console reads at startup
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsoleSettings {
    scrollback_lines: usize,
}

/// Build the router for all bridge endpoints
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/console.js", get(console_js))
        .route("/ws", get(ws_upgrade))
        .route("/api/scripts", get(list_scripts))
        .route("/api/config", get(console_settings))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn console_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        CONSOLE_JS,
    )
}

async fn list_scripts(State(state): State<AppState>) -> Json<Vec<AllowedScript>> {
    Json(state.dispatcher.allow_list().scripts().to_vec())
}

async fn console_settings(State(state): State<AppState>) -> Json<ConsoleSettings> {
    Json(ConsoleSettings {
        scrollback_lines: state.scrollback_lines,
    })
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        uptime_seconds: state.started_at.elapsed().as_secs(),
        active_connections: state.sessions.count().await,
        timestamp: now_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeConfig, ScriptEntry};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let config = BridgeConfig {
            scripts: vec![ScriptEntry {
                name: "echo".into(),
                path: "/bin/echo".into(),
                description: "Print arguments".into(),
                functions: vec![],
                working_dir: None,
            }],
            scrollback_lines: 250,
            ..BridgeConfig::default()
        };
        router(AppState::from_config(&config))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 100_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, json) = get_json(test_app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["activeConnections"], 0);
        assert!(json["uptimeSeconds"].is_u64());
    }

    #[tokio::test]
    async fn test_list_scripts() {
        let (status, json) = get_json(test_app(), "/api/scripts").await;
        assert_eq!(status, StatusCode::OK);
        let scripts = json.as_array().unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0]["name"], "echo");
        assert_eq!(scripts[0]["description"], "Print arguments");
    }

    #[tokio::test]
    async fn test_console_settings_follow_config() {
        let (status, json) = get_json(test_app(), "/api/config").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["scrollbackLines"], 250);
    }

    #[tokio::test]
    async fn test_index_serves_console() {
        let response = test_app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1_000_000).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("console.js"));
    }

    #[tokio::test]
    async fn test_console_js_content_type() {
        let response = test_app()
            .oneshot(Request::builder().uri("/console.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/javascript"));
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let response = test_app()
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
