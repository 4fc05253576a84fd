//! Shared helpers for the integration tests: a real server on a random
//! port, REST shortcuts and WebSocket frame readers.
#![allow(dead_code)]

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use noctes_server::config::Config;
use noctes_server::state::AppState;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsWrite = SplitSink<WsStream, Message>;
pub type WsRead = SplitStream<WsStream>;

pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    pub client: reqwest::Client,
}

/// Start the server on a random port.
pub async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = noctes_server::db::init_db(&data_dir).expect("Failed to init DB");
    let pepper = noctes_server::auth::password::load_or_generate_pepper(&data_dir)
        .expect("Failed to generate pepper");

    // Every test registers several users from 127.0.0.1.
    let config = Config {
        auth_rate_limit_burst: 0,
        ..Config::default()
    };
    let state = AppState::new(db, pepper, &config);

    let app = noctes_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Register a user and return (token, user id).
    pub async fn register(&self, username: &str) -> (String, String) {
        let resp = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": "correct horse",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "Registration failed for {}", username);
        let body: Value = resp.json().await.unwrap();
        (
            body["token"].as_str().unwrap().to_string(),
            body["id"].as_str().unwrap().to_string(),
        )
    }

    /// POST with an auth token; returns (status, body).
    pub async fn post(&self, token: &str, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .header("Authorization", token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    pub async fn get(&self, token: &str, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(self.url(path))
            .header("Authorization", token)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    pub async fn patch(&self, token: &str, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .patch(self.url(path))
            .header("Authorization", token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    pub async fn put(&self, token: &str, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .put(self.url(path))
            .header("Authorization", token)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    pub async fn delete(&self, token: &str, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .delete(self.url(path))
            .header("Authorization", token)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    /// Create a channel owned by `token`'s user; returns the channel id.
    pub async fn create_channel(&self, token: &str, name: &str, members: &[&str]) -> String {
        let (status, body) = self
            .post(token, "/api/channels", json!({ "name": name, "members": members }))
            .await;
        assert_eq!(status, 200, "Channel creation failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }

    /// Open a WebSocket without logging in.
    pub async fn connect(&self) -> (WsWrite, WsRead) {
        let (ws_stream, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("Failed to connect to WebSocket");
        ws_stream.split()
    }

    /// Open a WebSocket, log in and return the `auth_ack`.
    pub async fn ws_login(&self, token: &str) -> (WsWrite, WsRead, Value) {
        let (mut write, mut read) = self.connect().await;
        send_json(&mut write, json!({ "type": "login", "data": { "token": token } })).await;
        let ack = next_json(&mut read).await;
        assert_eq!(ack["type"], "auth_ack", "Expected auth_ack, got {ack}");
        (write, read, ack)
    }
}

pub async fn send_json(write: &mut WsWrite, value: Value) {
    write
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Next text frame as JSON, skipping pings.
pub async fn next_json(read: &mut WsRead) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Expected a frame within timeout")
            .expect("Stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected a text frame, got {:?}", other),
        }
    }
}

/// Skip frames until one of the given `type` arrives.
pub async fn next_of_type(read: &mut WsRead, kind: &str) -> Value {
    loop {
        let value = next_json(read).await;
        if value["type"] == kind {
            return value;
        }
    }
}

/// Skip text frames until the server closes; returns the close frame.
pub async fn next_close(read: &mut WsRead) -> CloseFrame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Expected close within timeout")
            .expect("Stream ended without a close frame")
            .expect("WebSocket error");
        match msg {
            Message::Close(Some(frame)) => return frame,
            Message::Close(None) => panic!("Close frame without code"),
            _ => continue,
        }
    }
}

/// Collect every text frame that arrives within `window`.
pub async fn drain_json(read: &mut WsRead, window: Duration) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(Some(Ok(msg))) = tokio::time::timeout(window, read.next()).await {
        if let Message::Text(text) = msg {
            frames.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    frames
}
