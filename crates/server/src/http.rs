//! The client-facing router: the WebSocket upgrade route plus health and
//! readiness checks. Metrics are served on their own listener
//! (`crate::metrics::init_metrics`), not through this router, per the
//! configured `observability.metrics_port`.

use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::gateway;
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let ws_path = state.settings.server.ws_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| gateway::handle_socket(socket, state))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Readiness additionally reports whether the gateway is still accepting new
/// sessions and how many are live, so a load balancer can drain a shutting-
/// down instance.
async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let shutting_down = state.registry.is_shutting_down();
    let status_code = if shutting_down {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };
    (
        status_code,
        Json(serde_json::json!({
            "status": if shutting_down { "shutting_down" } else { "ready" },
            "live_sessions": state.registry.len(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_config::Settings;
    use gateway_llm::HttpLlmBackend;
    use std::time::Duration;

    use crate::registry::SessionRegistry;
    use crate::sweeper::ResourceManager;

    fn test_state() -> Arc<AppState> {
        let settings = Arc::new(Settings::default());
        let registry = Arc::new(SessionRegistry::new(settings.server.max_concurrent_sessions));
        let resource_manager = Arc::new(ResourceManager::new(
            registry.clone(),
            Duration::from_millis(settings.session.idle_timeout_ms),
            Duration::from_millis(settings.session.max_duration_ms),
            Duration::from_millis(settings.session.sweep_interval_ms),
            Duration::from_millis(settings.server.shutdown_per_session_timeout_ms),
        ));
        let llm_backend: Arc<dyn gateway_llm::LlmBackend> = Arc::new(
            HttpLlmBackend::new((&settings.llm).into()).expect("valid llm http client config"),
        );
        Arc::new(AppState::new(settings, registry, resource_manager, llm_backend))
    }

    #[test]
    fn router_builds_with_configured_ws_path() {
        let _ = create_router(test_state());
    }
}
