pub mod events;
pub mod send;
pub mod system;

pub use events::*;
pub use send::*;
pub use system::*;

use axum::{http::StatusCode, Json};

use crate::api::types::ApiResponse;

pub(crate) type ApiError = (StatusCode, Json<ApiResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::failure(message)))
}
