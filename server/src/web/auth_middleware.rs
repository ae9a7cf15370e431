use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;

use crate::auth::token::verify_session_token;

use super::app_state::AppState;

/// Extractor that validates the session JWT from an `Authorization: Bearer` header.
/// Use this in any handler that requires authentication.
pub struct AuthUser {
    pub user_id: String,
    pub trust_domain_id: String,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| (StatusCode::UNAUTHORIZED, "Not authenticated").into_response())?;

        let identity = verify_session_token(bearer.token(), &state.auth_config).map_err(|_| {
            (StatusCode::UNAUTHORIZED, "Invalid or expired session").into_response()
        })?;

        Ok(AuthUser {
            user_id: identity.user_id,
            trust_domain_id: identity.trust_domain_id,
        })
    }
}
