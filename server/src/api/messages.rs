//! REST endpoints for posting and paging channel messages.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::channels::{parse_channel_id, UNKNOWN_CHANNEL};
use crate::api::error::ApiError;
use crate::auth::middleware::AuthUser;
use crate::db::models::MessageRecord;
use crate::db::{self, channels, messages, users};
use crate::ids::MessageId;
use crate::snowflake::now_millis;
use crate::state::AppState;

/// Maximum message content length (chars).
const MAX_CONTENT_LENGTH: usize = 2000;
/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<MessageId>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessageRecord>,
}

fn validate_content(content: &str) -> Result<(), ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::bad_request("Content is required"));
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(ApiError::bad_request(
            "Content must not be more than 2000 characters",
        ));
    }
    Ok(())
}

/// POST /api/channels/{id}/messages
/// Stores the message and pushes it to every session subscribed to the channel.
pub async fn post_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(raw_id): Path<String>,
    body: Result<Json<PostMessageRequest>, JsonRejection>,
) -> Result<Json<MessageRecord>, ApiError> {
    let channel_id = parse_channel_id(&raw_id)?;
    let Json(body) = body?;
    validate_content(&body.content)?;

    let author_id = auth.user_id;
    let message_id = state.ids.generate();
    let hub = state.hub.clone();

    let message = db::run(&state.db, move |conn| -> Result<MessageRecord, ApiError> {
        let tx = conn.transaction()?;
        let author = users::user_by_id(&tx, author_id)?;
        if !channels::is_member(&tx, channel_id, author_id)? {
            return Err(ApiError::not_found(UNKNOWN_CHANNEL));
        }

        let timestamp = now_millis() as i64;
        messages::insert_message(&tx, message_id, channel_id, author_id, &body.content, timestamp)?;
        tx.commit()?;

        let message = MessageRecord {
            id: message_id,
            channel_id,
            author,
            content: body.content,
            timestamp,
            edited: None,
        };
        hub.push_message(&message);
        Ok(message)
    })
    .await?;

    tracing::debug!(channel_id, message_id, author_id, "Message posted");
    Ok(Json(message))
}

/// GET /api/channels/{id}/messages?before={id}&limit={n}
/// Newest first. Members only.
pub async fn get_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(raw_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let channel_id = parse_channel_id(&raw_id)?;
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let user_id = auth.user_id;

    let messages = db::run(&state.db, move |conn| -> Result<Vec<MessageRecord>, ApiError> {
        if !channels::is_member(conn, channel_id, user_id)? {
            return Err(ApiError::not_found(UNKNOWN_CHANNEL));
        }
        Ok(messages::history(conn, channel_id, query.before, limit)?)
    })
    .await?;

    Ok(Json(HistoryResponse { messages }))
}
