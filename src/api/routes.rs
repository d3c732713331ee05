use axum::routing::{get, post};
use axum::{Json, Router};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{
    handle_deposit, handle_history, handle_info, handle_process_withdrawals, handle_stats,
    handle_withdraw,
};
use super::models::HealthResponse;
use crate::bridge::service::BridgeService;
use crate::queue::settlement::SettlementSweep;

/// Per-bridge handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub service: Arc<BridgeService>,
    pub settlement: Option<Arc<SettlementSweep>>,
    pub admin_key: Option<String>,
}

pub fn bridge_routes(state: AppState) -> Router {
    Router::new()
        .route("/info", get(handle_info))
        .route("/stats", get(handle_stats))
        .route("/deposit", post(handle_deposit))
        .route("/withdraw", post(handle_withdraw))
        .route("/history", get(handle_history))
        .route("/process-withdrawals", post(handle_process_withdrawals))
        .with_state(state)
}

/// Mounts every bridge under `/api/<slug>-bridge` next to `/health`.
pub fn create_router(states: Vec<AppState>) -> Router {
    let slugs: Vec<String> = states
        .iter()
        .map(|state| state.service.bridge().slug.clone())
        .collect();

    let mut router = Router::new().route(
        "/health",
        get(move || {
            let bridges = slugs.clone();
            async move {
                Json(HealthResponse {
                    status: "ok".to_string(),
                    bridges,
                })
            }
        }),
    );

    for state in states {
        let path = format!("/api/{}-bridge", state.service.bridge().slug);
        router = router.nest(&path, bridge_routes(state));
    }

    router.layer(TraceLayer::new_for_http())
}
