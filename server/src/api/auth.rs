//! Account endpoints: register, password login and logout.

use axum::{extract::rejection::JsonRejection, extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::auth::middleware::AuthUser;
use crate::auth::password::{generate_salt, hash_password, verify_password};
use crate::auth::token::{encode_token, generate_secret, hash_secret, TokenIdentity};
use crate::db::users::{self, NewUser, UniqueConflict};
use crate::db::{self, tokens};
use crate::ids::UserId;
use crate::snowflake::now_millis;
use crate::state::AppState;

const MAX_EMAIL_LENGTH: usize = 254;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    #[serde(with = "crate::ids::string")]
    pub id: UserId,
}

/// Lowercase ASCII letters, digits and underscores.
pub fn is_valid_username_charset(username: &str) -> bool {
    username
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// A single `@` with something on both sides.
fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

fn validate_register(body: &RegisterRequest) -> Result<(), ApiError> {
    let username_len = body.username.chars().count();
    if body.username.is_empty() {
        return Err(ApiError::bad_request("Username is required"));
    }
    if !(3..=20).contains(&username_len) {
        return Err(ApiError::bad_request(
            "Username must be between 3 and 20 characters",
        ));
    }
    if !is_valid_username_charset(&body.username) {
        return Err(ApiError::bad_request(
            "Username may only contain lowercase characters, numbers and underscores.",
        ));
    }
    if body.email.is_empty() {
        return Err(ApiError::bad_request("Email is required"));
    }
    if !is_plausible_email(&body.email) {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    if body.password.is_empty() {
        return Err(ApiError::bad_request("Password is required"));
    }
    Ok(())
}

fn validate_login(body: &LoginRequest) -> Result<(), ApiError> {
    if body.email.is_empty() {
        return Err(ApiError::bad_request("Email is required"));
    }
    if !is_plausible_email(&body.email) {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    if body.email.chars().count() > MAX_EMAIL_LENGTH {
        return Err(ApiError::bad_request(
            "Email Address is too long: can't be more than 254 characters",
        ));
    }
    if body.password.is_empty() {
        return Err(ApiError::bad_request("Password is required"));
    }
    Ok(())
}

/// Fresh token for `user_id`: the string handed to the client and the
/// identity stored server-side.
fn new_token(user_id: UserId) -> (String, TokenIdentity) {
    let secret = generate_secret();
    let identity = TokenIdentity {
        user_id,
        key_hash: hash_secret(&secret),
    };
    (encode_token(user_id, &secret), identity)
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(body) = body?;
    validate_register(&body)?;

    let salt = generate_salt();
    let user = NewUser {
        id: state.ids.generate(),
        username: body.username,
        email: body.email,
        password_hash: hash_password(&state.pepper, &salt, &body.password),
        password_salt: salt.to_vec(),
        created_at: now_millis() as i64,
    };
    let user_id = user.id;
    let (token, identity) = new_token(user_id);

    db::run(&state.db, move |conn| -> Result<(), ApiError> {
        let tx = conn.transaction()?;
        if let Err(e) = users::insert_user(&tx, &user) {
            return Err(match users::unique_conflict(&e) {
                Some(UniqueConflict::Email) => ApiError::bad_request("Email already exists."),
                Some(UniqueConflict::Username) => {
                    ApiError::bad_request("Username already exists.")
                }
                None => e.into(),
            });
        }
        tokens::insert_user_token(&tx, &identity, user.created_at)?;
        tx.commit()?;
        Ok(())
    })
    .await?;

    tracing::info!(user_id, "User registered");
    Ok(Json(TokenResponse { token, id: user_id }))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(body) = body?;
    validate_login(&body)?;

    let pepper = state.pepper.clone();
    let (token, user_id) = db::run(&state.db, move |conn| -> Result<(String, UserId), ApiError> {
        let tx = conn.transaction()?;
        let wrong = || ApiError::bad_request("Email or password is wrong.");

        let login = users::login_data_by_email(&tx, &body.email)?.ok_or_else(wrong)?;
        if !verify_password(&pepper, &login.password_salt, &body.password, &login.password_hash) {
            return Err(wrong());
        }

        let (token, identity) = new_token(login.id);
        tokens::insert_user_token(&tx, &identity, now_millis() as i64)?;
        tx.commit()?;
        Ok((token, login.id))
    })
    .await?;

    tracing::debug!(user_id, "Password login");
    Ok(Json(TokenResponse { token, id: user_id }))
}

/// POST /api/auth/logout
/// Revokes the presented token and closes every WebSocket logged in with it.
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let hub = state.hub.clone();
    let identity = auth.token;

    let closed = db::run(&state.db, move |conn| -> Result<usize, ApiError> {
        if !tokens::revoke_user_token(conn, &identity)? {
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Logout Failed.",
            ));
        }
        Ok(hub.revoke_token(&identity))
    })
    .await?;

    tracing::info!(user_id = auth.user_id, sessions = closed, "Token revoked");
    Ok(Json(serde_json::json!({ "ok": true })))
}
