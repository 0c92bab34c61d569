use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Trigger a run
        .route("/send", post(handlers::send_handler))
        // Poll a subscription's run
        .route("/events/:subscription_id", get(handlers::get_events))
        // Liveness
        .route("/health", get(handlers::health_handler))
        // Add state and CORS
        .with_state(state)
        .layer(cors)
}
