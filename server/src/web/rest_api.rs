use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::error;

use super::app_state::AppState;
use super::auth_middleware::AuthUser;

/// GET /api/channels — list all channels, grouped by category then name.
pub async fn get_channels(State(state): State<Arc<AppState>>, auth: AuthUser) -> impl IntoResponse {
    match state.engine.list_channels().await {
        Ok(channels) => Json(channels).into_response(),
        Err(e) => {
            error!(error = %e, user_id = %auth.user_id, "failed to list channels");
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response()
        }
    }
}

/// GET /api/health — liveness check.
pub async fn health() -> &'static str {
    "ok"
}
