use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::auth::is_valid_username_charset;
use crate::api::error::ApiError;
use crate::auth::middleware::AuthUser;
use crate::db::models::{SelfUser, UserSummary};
use crate::db::{self, users};
use crate::ids::parse_id;
use crate::state::AppState;

/// GET /api/users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<UserSummary>, ApiError> {
    let id = parse_id(&raw_id).ok_or_else(|| ApiError::bad_request("Invalid user id."))?;

    let user = db::run(&state.db, move |conn| {
        users::user_by_id(conn, id).map_err(ApiError::from)
    })
    .await?;

    user.map(Json)
        .ok_or_else(|| ApiError::not_found("User doesn't exist."))
}

/// GET /api/usernames/{username}
pub async fn get_user_by_username(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<UserSummary>, ApiError> {
    let len = username.chars().count();
    if !(3..=20).contains(&len) || !is_valid_username_charset(&username) {
        return Err(ApiError::bad_request("Invalid username."));
    }

    let user = db::run(&state.db, move |conn| {
        users::user_by_username(conn, &username).map_err(ApiError::from)
    })
    .await?;

    user.map(Json)
        .ok_or_else(|| ApiError::not_found("User doesn't exist."))
}

/// GET /api/users/@me
pub async fn get_self(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<SelfUser>, ApiError> {
    let user_id = auth.user_id;
    let user = db::run(&state.db, move |conn| {
        users::self_user(conn, user_id).map_err(ApiError::from)
    })
    .await?;

    // The token outlived its account only if the row was deleted by hand.
    user.map(Json)
        .ok_or_else(|| ApiError::not_found("User doesn't exist."))
}
