use axum::{extract::State, Json};

use crate::api::{state::AppState, types::HealthResponse};

/// GET /health -- lightweight liveness probe
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.uptime_seconds(),
        active_runs: state.runner.active_runs(),
        live_subscriptions: state.coordinator.live_subscriptions(),
        store: state.coordinator.store_name().to_string(),
        agent: state.runner.agent_name().to_string(),
    })
}
