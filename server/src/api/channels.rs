//! Channel CRUD and membership endpoints.
//!
//! Every handler that changes what live sessions should see calls the hub
//! from inside its store closure, after commit and before the store lock is
//! released, so a concurrent WebSocket login either sees the change in its
//! snapshot or receives it live.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::api::error::ApiError;
use crate::auth::middleware::AuthUser;
use crate::db::models::{ChannelRecord, UserSummary};
use crate::db::{self, channels, users};
use crate::hub::Hub;
use crate::ids::{parse_id, ChannelId, UserId};
use crate::snowflake::now_millis;
use crate::state::AppState;

pub const UNKNOWN_CHANNEL: &str = "Unknown Channel.";
const NOT_OWNER: &str = "Only the channel owner can do that.";

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    #[serde(default)]
    pub name: String,
    /// Ids as decimal strings; numbers are accepted too.
    #[serde(default)]
    pub members: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChannelRequest {
    #[serde(default, deserialize_with = "crate::ids::option::deserialize")]
    pub owner: Option<UserId>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChannelListResponse {
    pub channels: Vec<ChannelRecord>,
}

// --- Validation ---

pub fn parse_channel_id(raw: &str) -> Result<ChannelId, ApiError> {
    parse_id(raw).ok_or_else(|| ApiError::bad_request("Invalid channel id."))
}

fn member_id(value: &serde_json::Value) -> Option<UserId> {
    let id = match value {
        serde_json::Value::String(s) => parse_id(s)?,
        serde_json::Value::Number(n) => n.as_u64()?,
        _ => return None,
    };
    (id != 0).then_some(id)
}

/// Checks run in the order clients see them reported; the first failure wins.
fn validate_create(body: &CreateChannelRequest, creator: UserId) -> Result<Vec<UserId>, ApiError> {
    if body.name.is_empty() {
        return Err(ApiError::bad_request("Channel Name is required"));
    }
    if !(3..=20).contains(&body.name.chars().count()) {
        return Err(ApiError::bad_request(
            "Channel Name must be between 3 and 20 characters",
        ));
    }

    let members = body
        .members
        .iter()
        .map(|value| member_id(value).ok_or_else(|| ApiError::bad_request("Invalid Member ID")))
        .collect::<Result<Vec<_>, _>>()?;

    let distinct: HashSet<UserId> = members.iter().copied().collect();
    if distinct.len() != members.len() {
        return Err(ApiError::bad_request(
            "You can't specify the same Member ID twice",
        ));
    }
    if members.is_empty() {
        return Err(ApiError::bad_request(
            "You can't create a channel all for yourself",
        ));
    }
    if distinct.contains(&creator) {
        return Err(ApiError::bad_request(
            "You are already implicitly added in this channel.",
        ));
    }
    Ok(members)
}

fn validate_update(body: &UpdateChannelRequest) -> Result<(), ApiError> {
    if body.owner.is_none() && body.name.is_none() {
        return Err(ApiError::bad_request(
            "You need to update at least Owner or Channel Name",
        ));
    }
    if let Some(name) = &body.name {
        if !(3..=50).contains(&name.chars().count()) {
            return Err(ApiError::bad_request(
                "Channel Name must be between 3 and 50 characters",
            ));
        }
    }
    Ok(())
}

/// The caller's view of a channel, or 404 if they are not in it.
fn require_member(
    conn: &rusqlite::Connection,
    channel_id: ChannelId,
    user_id: UserId,
) -> Result<ChannelRecord, ApiError> {
    channels::channel_for_member(conn, channel_id, user_id)?
        .ok_or_else(|| ApiError::not_found(UNKNOWN_CHANNEL))
}

fn require_owner(channel: &ChannelRecord, user_id: UserId) -> Result<(), ApiError> {
    match &channel.owner {
        Some(owner) if owner.id == user_id => Ok(()),
        _ => Err(ApiError::forbidden(NOT_OWNER)),
    }
}

// --- Handlers ---

/// GET /api/channels
pub async fn list_channels(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<ChannelListResponse>, ApiError> {
    let user_id = auth.user_id;
    let channels = db::run(&state.db, move |conn| {
        channels::list_for_user(conn, user_id).map_err(ApiError::from)
    })
    .await?;
    Ok(Json(ChannelListResponse { channels }))
}

/// GET /api/channels/{id}
pub async fn get_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(raw_id): Path<String>,
) -> Result<Json<ChannelRecord>, ApiError> {
    let channel_id = parse_channel_id(&raw_id)?;
    let user_id = auth.user_id;
    let channel = db::run(&state.db, move |conn| require_member(conn, channel_id, user_id)).await?;
    Ok(Json(channel))
}

/// POST /api/channels
/// Creates a channel owned by the caller and pushes it to every online member.
pub async fn create_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    body: Result<Json<CreateChannelRequest>, JsonRejection>,
) -> Result<Json<ChannelRecord>, ApiError> {
    let Json(body) = body?;
    let owner = auth.user_id;
    let members = validate_create(&body, owner)?;
    let name = body.name;

    let channel_id = state.ids.generate();
    let now = now_millis() as i64;
    let hub = state.hub.clone();

    let channel = db::run(&state.db, move |conn| -> Result<ChannelRecord, ApiError> {
        let tx = conn.transaction()?;
        if let Err(e) = channels::create_channel(&tx, channel_id, owner, &name, &members, now) {
            return Err(if channels::is_foreign_key_violation(&e) {
                ApiError::bad_request("One or more members doesn't exist.")
            } else {
                e.into()
            });
        }
        let channel = require_member(&tx, channel_id, owner)?;
        tx.commit()?;

        let recipients: Vec<UserId> = std::iter::once(owner).chain(members).collect();
        announce_created(&hub, &recipients, &channel, || {
            channels::channel_members(conn, channel_id)
        });
        Ok(channel)
    })
    .await?;

    tracing::info!(channel_id, owner, "Channel created");
    Ok(Json(channel))
}

/// Push a committed channel to its online members. The channel exists
/// either way, so a failed member lookup is logged rather than returned.
fn announce_created<F>(hub: &Hub, recipients: &[UserId], channel: &ChannelRecord, fetch_members: F)
where
    F: FnOnce() -> rusqlite::Result<Vec<UserSummary>>,
{
    if let Err(e) = hub.announce_channel_bulk(recipients, channel, fetch_members) {
        tracing::error!(channel_id = channel.id, error = %e, "Failed to announce new channel");
    }
}

/// PATCH /api/channels/{id}
/// Rename the channel or hand it to another member. Owner only.
pub async fn update_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(raw_id): Path<String>,
    body: Result<Json<UpdateChannelRequest>, JsonRejection>,
) -> Result<Json<ChannelRecord>, ApiError> {
    let channel_id = parse_channel_id(&raw_id)?;
    let Json(body) = body?;
    validate_update(&body)?;

    let user_id = auth.user_id;
    let hub = state.hub.clone();

    let channel = db::run(&state.db, move |conn| -> Result<ChannelRecord, ApiError> {
        let tx = conn.transaction()?;
        let current = require_member(&tx, channel_id, user_id)?;
        require_owner(&current, user_id)?;
        if let Some(new_owner) = body.owner {
            if !channels::is_member(&tx, channel_id, new_owner)? {
                return Err(ApiError::bad_request(
                    "The new owner must be a member of this channel.",
                ));
            }
        }

        channels::update_channel(&tx, channel_id, body.name.as_deref(), body.owner)?;
        let updated = require_member(&tx, channel_id, user_id)?;
        tx.commit()?;

        hub.update_channel(&updated);
        Ok(updated)
    })
    .await?;

    tracing::info!(channel_id, user_id, "Channel updated");
    Ok(Json(channel))
}

/// DELETE /api/channels/{id}
/// Owner only.
pub async fn delete_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(raw_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let channel_id = parse_channel_id(&raw_id)?;
    let user_id = auth.user_id;
    let hub = state.hub.clone();

    db::run(&state.db, move |conn| -> Result<(), ApiError> {
        let tx = conn.transaction()?;
        let channel = require_member(&tx, channel_id, user_id)?;
        require_owner(&channel, user_id)?;
        channels::delete_channel(&tx, channel_id)?;
        tx.commit()?;

        hub.delete_channel(channel_id);
        Ok(())
    })
    .await?;

    tracing::info!(channel_id, user_id, "Channel deleted");
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// PUT /api/channels/{id}/members/{user_id}
/// Owner only. Existing members get `push_channel_member`; the new member's
/// live sessions get the whole channel.
pub async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((raw_channel, raw_user)): Path<(String, String)>,
) -> Result<Json<UserSummary>, ApiError> {
    let channel_id = parse_channel_id(&raw_channel)?;
    let member_id = parse_id(&raw_user).ok_or_else(|| ApiError::bad_request("Invalid user id."))?;
    let user_id = auth.user_id;
    let hub = state.hub.clone();

    let member = db::run(&state.db, move |conn| -> Result<UserSummary, ApiError> {
        let tx = conn.transaction()?;
        let channel = require_member(&tx, channel_id, user_id)?;
        require_owner(&channel, user_id)?;
        let member = users::user_by_id(&tx, member_id)?
            .ok_or_else(|| ApiError::not_found("User doesn't exist."))?;
        if !channels::add_member(&tx, channel_id, member_id, now_millis() as i64)? {
            return Err(ApiError::bad_request(
                "User is already a member of this channel.",
            ));
        }
        let channel = require_member(&tx, channel_id, member_id)?;
        let members = channels::channel_members(&tx, channel_id)?;
        tx.commit()?;

        // Before the announce, so the new member is not told about itself twice.
        hub.push_channel_member(channel_id, &member);
        hub.announce_channel(member_id, &channel, &members);
        Ok(member)
    })
    .await?;

    tracing::info!(channel_id, member_id, "Member added");
    Ok(Json(member))
}

/// DELETE /api/channels/{id}/members/{user_id}
/// A member may remove themselves; the owner may remove anyone.
pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((raw_channel, raw_user)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let channel_id = parse_channel_id(&raw_channel)?;
    let member_id = parse_id(&raw_user).ok_or_else(|| ApiError::bad_request("Invalid user id."))?;
    let user_id = auth.user_id;
    let hub = state.hub.clone();

    db::run(&state.db, move |conn| -> Result<(), ApiError> {
        let tx = conn.transaction()?;
        let channel = require_member(&tx, channel_id, user_id)?;
        if member_id != user_id {
            require_owner(&channel, user_id)?;
        }
        if !channels::remove_member(&tx, channel_id, member_id)? {
            return Err(ApiError::not_found(
                "User is not a member of this channel.",
            ));
        }
        let was_owner = channel.owner.as_ref().is_some_and(|o| o.id == member_id);
        let updated = channels::channel_by_id(&tx, channel_id)?;
        tx.commit()?;

        hub.leave_channel(member_id, channel_id);
        hub.remove_channel_member(channel_id, member_id);
        if was_owner {
            if let Some(updated) = &updated {
                hub.update_channel(updated);
            }
        }
        Ok(())
    })
    .await?;

    tracing::info!(channel_id, member_id, "Member removed");
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::test_support::{drain, handle};
    use serde_json::json;

    fn create(name: &str, members: serde_json::Value) -> CreateChannelRequest {
        serde_json::from_value(json!({ "name": name, "members": members })).unwrap()
    }

    fn create_error(body: CreateChannelRequest) -> String {
        validate_create(&body, 1).unwrap_err().message
    }

    #[test]
    fn create_validation_messages() {
        assert_eq!(create_error(create("", json!(["2"]))), "Channel Name is required");
        assert_eq!(
            create_error(create("ab", json!(["2"]))),
            "Channel Name must be between 3 and 20 characters"
        );
        assert_eq!(create_error(create("abc", json!(["x"]))), "Invalid Member ID");
        assert_eq!(
            create_error(create("abc", json!(["2", 2]))),
            "You can't specify the same Member ID twice"
        );
        assert_eq!(
            create_error(create("abc", json!([]))),
            "You can't create a channel all for yourself"
        );
        assert_eq!(
            create_error(create("abc", json!(["1"]))),
            "You are already implicitly added in this channel."
        );
        assert_eq!(validate_create(&create("abc", json!(["2", 3])), 1).unwrap(), vec![2, 3]);
    }

    #[test]
    fn update_needs_a_field() {
        let body: UpdateChannelRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(
            validate_update(&body).unwrap_err().message,
            "You need to update at least Owner or Channel Name"
        );
        let body: UpdateChannelRequest = serde_json::from_value(json!({ "name": "xy" })).unwrap();
        assert_eq!(
            validate_update(&body).unwrap_err().message,
            "Channel Name must be between 3 and 50 characters"
        );
        let body: UpdateChannelRequest = serde_json::from_value(json!({ "owner": "5" })).unwrap();
        assert!(validate_update(&body).is_ok());
    }

    #[test]
    fn failed_member_lookup_after_create_is_not_an_error() {
        let hub = Hub::new();
        let (owner, mut rx) = handle(1);
        hub.users.subscribe(1, &owner);
        let channel = ChannelRecord {
            id: 100,
            name: "general".into(),
            owner: None,
            member_count: 2,
            created_at: 0,
            last_accessed: 0,
        };

        announce_created(&hub, &[1, 2], &channel, || {
            Err(rusqlite::Error::QueryReturnedNoRows)
        });

        assert!(drain(&mut rx).is_empty());
        assert!(!hub.channels.contains(&100));
    }
}
