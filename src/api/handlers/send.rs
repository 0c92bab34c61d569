use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info};

use super::{api_error, ApiError};
use crate::api::{
    state::AppState,
    types::{ApiResponse, SendRequest},
};
use crate::error::AdmitError;
use crate::runner::RunRequest;

/// POST /send
///
/// Admits a run for the subscription and hands it to the runner. Returns as
/// soon as the run is admitted; its progress is only visible by polling.
pub async fn send_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendRequest>, JsonRejection>,
) -> std::result::Result<Json<ApiResponse>, ApiError> {
    let Json(req) = payload.map_err(|rejection| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("invalid request body: {}", rejection.body_text()),
        )
    })?;
    req.validate()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let ticket = state
        .coordinator
        .admit(&req.subscription_id)
        .await
        .map_err(|e| match e {
            AdmitError::Conflict => api_error(
                StatusCode::CONFLICT,
                format!(
                    "a run is already in progress for subscription {}",
                    req.subscription_id
                ),
            ),
            AdmitError::Unavailable(reason) => {
                error!(subscription_id = %req.subscription_id, %reason, "admission failed closed");
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "coordinator unavailable; run not started",
                )
            }
        })?;

    let SendRequest {
        private_key,
        strategy,
        subscription_id,
        delegation_wallet_id,
        recent_actions,
    } = req;

    info!(
        subscription_id = %subscription_id,
        generation = ticket.generation,
        strategy = %strategy.name,
        "run admitted; starting agent"
    );
    state.runner.launch(RunRequest {
        ticket,
        private_key,
        strategy,
        delegation_wallet_id,
        recent_actions,
    });

    Ok(Json(ApiResponse::ok(format!(
        "agent run started for subscription {}",
        subscription_id
    ))))
}
