use axum::{
    extract::{ws::rejection::WebSocketUpgradeRejection, ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::state::AppState;
use crate::ws::actor;

/// Slack over `max_frame_bytes` so moderately oversized frames are read in
/// full before the connection closes them with 1009. Anything past the
/// transport limit is refused by tungstenite and mapped to the same close.
/// Fragmented messages are reassembled up to this limit, then size-checked.
const TRANSPORT_FRAME_SLACK: usize = 64 * 1024;

/// GET /ws
/// WebSocket upgrade endpoint. Authentication happens in-band with a
/// `login` frame, so every well-formed upgrade is accepted.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected non-WebSocket request on /ws");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid WebSocket request" })),
            )
                .into_response();
        }
    };

    let limit = state.ws.max_frame_bytes + TRANSPORT_FRAME_SLACK;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| actor::run_connection(socket, state))
}
