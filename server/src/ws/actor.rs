use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;
use crate::ws::connection::Connection;
use crate::ws::error::{close_code, ConnectionError};

/// How long the writer may keep flushing after the read loop has ended.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Run the actor-per-connection pattern for one WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: decodes incoming frames and dispatches them to the `Connection`
///
/// Everything that wants to reach this client (replies, hub broadcasts,
/// the ping task) goes through the same mpsc queue, so writes stay ordered.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let cancel = state.shutdown.child_token();
    let mut conn = Connection::new(
        state.hub.clone(),
        state.db.clone(),
        tx.clone(),
        state.ws.max_frame_bytes,
    );
    let connection_id = conn.id();

    tracing::info!(connection_id, "WebSocket actor started");

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx, cancel.clone()));

    // Track pong reception
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_handle = tokio::spawn(ping_task(
        tx.clone(),
        pong_rx,
        state.ws.ping_interval,
        state.ws.pong_timeout,
    ));
    drop(tx);

    // Reader loop: process incoming WebSocket messages
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                if state.shutdown.is_cancelled() {
                    conn.report(&ConnectionError::Cancelled);
                }
                // Otherwise the writer already sent a close frame or failed.
                break;
            }
            next = ws_receiver.next() => next,
        };

        match next {
            Some(Ok(msg)) => {
                let result = match msg {
                    Message::Text(text) => {
                        conn.handle_frame_or_cancel(text.as_str().as_bytes(), &cancel)
                            .await
                    }
                    Message::Binary(data) => conn.handle_frame_or_cancel(&data, &cancel).await,
                    Message::Pong(_) => {
                        // Pong received, notify the ping task
                        let _ = pong_tx.send(());
                        Ok(())
                    }
                    Message::Ping(data) => {
                        conn.send_and_forget(Message::Pong(data));
                        Ok(())
                    }
                    Message::Close(frame) => {
                        tracing::info!(
                            connection_id,
                            reason = ?frame,
                            "Client initiated close"
                        );
                        break;
                    }
                };

                if let Err(err) = result {
                    if matches!(err, ConnectionError::Cancelled) && !state.shutdown.is_cancelled() {
                        // The writer already sent a close frame or failed.
                        break;
                    }
                    conn.report(&err);
                    if err.is_fatal() {
                        break;
                    }
                }
            }
            Some(Err(e)) => {
                conn.report(&ConnectionError::from(e));
                break;
            }
            None => {
                // Stream ended, client disconnected
                tracing::info!(connection_id, "WebSocket stream ended");
                break;
            }
        }
    }

    conn.cleanup();
    ping_handle.abort();
    drop(conn);

    // Give the writer a chance to flush a pending close frame.
    if timeout(CLOSE_GRACE, writer_handle).await.is_err() {
        tracing::debug!(connection_id, "Writer did not finish in time");
    }

    tracing::info!(connection_id, "WebSocket actor stopped");
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
/// Stops after a close frame or a failed write and cancels the connection.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
        if closing {
            break;
        }
    }
    cancel.cancel();
}

/// Sends periodic pings and closes the connection if a pong does not
/// arrive in time.
async fn ping_task(
    tx: mpsc::UnboundedSender<Message>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    ping_interval: Duration,
    pong_timeout: Duration,
) {
    let mut ping_timer = interval(ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died, connection is gone
            break;
        }

        match timeout(pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: close_code::GOING_AWAY,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }
}
