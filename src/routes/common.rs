//! Operational routes: liveness, store readiness and a description of the mounted gateway.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    store: &'static str,
    types: usize,
}

#[derive(Serialize)]
struct GatewayInfo {
    name: &'static str,
    version: &'static str,
    prefix: String,
    debug: bool,
    /// `app.name` labels of every registered entity type.
    types: Vec<String>,
}

async fn health() -> &'static str {
    "ok"
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyBody>) {
    let types = state.registry.list_types().len();
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyBody {
                status: "ok",
                store: "ok",
                types,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "store is not reachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyBody {
                    status: "degraded",
                    store: "unavailable",
                    types,
                }),
            )
        }
    }
}

async fn version(State(state): State<AppState>) -> Json<GatewayInfo> {
    Json(GatewayInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        prefix: state.settings.prefix.clone(),
        debug: state.settings.debug,
        types: state.registry.list_types().iter().map(|t| t.label.clone()).collect(),
    })
}

/// GET /health, GET /ready (store ping) and GET /version.
pub fn common_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/version", get(version))
        .with_state(state)
}
