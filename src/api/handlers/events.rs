use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::{state::AppState, types::EventsResponse};

/// GET /events/:subscription_id
///
/// Never fails: unknown or flushed keys read as `{ status: "idle", events: [] }`.
pub async fn get_events(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
) -> Json<EventsResponse> {
    let snapshot = state.coordinator.status(&subscription_id).await;
    Json(snapshot.into())
}
