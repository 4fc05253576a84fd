//! Integration tests for registration, login, logout and user lookups.

mod common;

use common::start_test_server;
use serde_json::json;

#[tokio::test]
async fn test_health_check() {
    let server = start_test_server().await;
    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_register_then_login() {
    let server = start_test_server().await;
    let (token, id) = server.register("alice").await;
    assert!(token.contains(':'));

    let (status, me) = server.get(&token, "/api/users/@me").await;
    assert_eq!(status, 200);
    assert_eq!(me["id"], id.as_str());
    assert_eq!(me["username"], "alice");
    assert_eq!(me["email"], "alice@example.com");
    assert_eq!(me["email_verified"], false);

    let (status, body) = server
        .post(
            "",
            "/api/auth/login",
            json!({ "email": "alice@example.com", "password": "correct horse" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["id"], id.as_str());
    assert_ne!(body["token"], token.as_str(), "Each login issues a fresh token");
}

#[tokio::test]
async fn test_login_wrong_password() {
    let server = start_test_server().await;
    server.register("alice").await;

    for body in [
        json!({ "email": "alice@example.com", "password": "wrong" }),
        json!({ "email": "nobody@example.com", "password": "correct horse" }),
    ] {
        let (status, resp) = server.post("", "/api/auth/login", body).await;
        assert_eq!(status, 400);
        assert_eq!(resp["error"], "Email or password is wrong.");
    }
}

#[tokio::test]
async fn test_register_duplicates_and_validation() {
    let server = start_test_server().await;
    server.register("alice").await;

    let (status, body) = server
        .post(
            "",
            "/api/auth/register",
            json!({ "username": "alice", "email": "other@example.com", "password": "pw" }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Username already exists.");

    let (status, body) = server
        .post(
            "",
            "/api/auth/register",
            json!({ "username": "alice2", "email": "alice@example.com", "password": "pw" }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Email already exists.");

    let (status, body) = server
        .post(
            "",
            "/api/auth/register",
            json!({ "username": "Alice!", "email": "a@example.com", "password": "pw" }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(
        body["error"],
        "Username may only contain lowercase characters, numbers and underscores."
    );

    let resp = server
        .client
        .post(server.url("/api/auth/register"))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Invalid JSON");
}

#[tokio::test]
async fn test_auth_header_errors() {
    let server = start_test_server().await;

    let resp = server
        .client
        .get(server.url("/api/users/@me"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "You need to be logged in.");

    let (status, body) = server.get("garbage", "/api/users/@me").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Invalid token.");
}

#[tokio::test]
async fn test_logout_revokes_token() {
    let server = start_test_server().await;
    let (token, _id) = server.register("alice").await;

    let (status, body) = server.post(&token, "/api/auth/logout", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);

    let (status, body) = server.get(&token, "/api/users/@me").await;
    assert_eq!(status, 401);
    assert_eq!(
        body["error"],
        "You've been logged out. Please log in and try again."
    );
}

#[tokio::test]
async fn test_user_lookups() {
    let server = start_test_server().await;
    let (token, id) = server.register("alice").await;

    let (status, body) = server.get(&token, &format!("/api/users/{id}")).await;
    assert_eq!(status, 200);
    assert_eq!(body["username"], "alice");
    assert!(body.get("email").is_none(), "Public view must not leak email");

    let (status, body) = server.get("", "/api/usernames/alice").await;
    assert_eq!(status, 200);
    assert_eq!(body["id"], id.as_str());

    let (status, body) = server.get("", "/api/users/abc").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Invalid user id.");

    let (status, body) = server.get("", "/api/users/12345").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "User doesn't exist.");

    let (status, body) = server.get("", "/api/usernames/No").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Invalid username.");
}

#[tokio::test]
async fn test_unknown_route() {
    let server = start_test_server().await;
    let (status, body) = server.get("", "/api/nope").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "API Endpoint: Not Found.");
}
