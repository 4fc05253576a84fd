use axum::{extract::FromRequestParts, http::request::Parts, http::StatusCode};

use crate::api::error::ApiError;
use crate::auth::token::{decode_token, TokenIdentity};
use crate::db::{self, tokens};
use crate::ids::UserId;
use crate::state::AppState;

/// The caller authenticated by the raw token in the `Authorization` header.
/// Implements axum's FromRequestParts for use as an extractor.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: UserId,
    /// Identity of the presented token, used to revoke it on logout
    pub token: TokenIdentity,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "You need to be logged in."))?;

        let token = decode_token(raw.trim())
            .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "Invalid token."))?;
        let identity = token.identity();

        let known = db::run(&state.db, move |conn| {
            tokens::has_user_token(conn, &identity).map_err(ApiError::from)
        })
        .await?;

        if !known {
            return Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                "You've been logged out. Please log in and try again.",
            ));
        }

        Ok(AuthUser {
            user_id: identity.user_id,
            token: identity,
        })
    }
}
