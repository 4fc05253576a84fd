use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
///
/// Ids are snowflakes stored in INTEGER columns; timestamps are Unix
/// milliseconds.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Initial schema

CREATE TABLE users (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL,
    email TEXT NOT NULL,
    email_verified INTEGER NOT NULL DEFAULT 0,
    password_hash BLOB NOT NULL,
    password_salt BLOB NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX users_username ON users(username);
CREATE UNIQUE INDEX users_email ON users(email);

CREATE TABLE user_tokens (
    user_id INTEGER NOT NULL,
    key_hash BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, key_hash),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE channels (
    id INTEGER PRIMARY KEY,
    owner INTEGER,
    name TEXT NOT NULL,
    member_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (owner) REFERENCES users(id) ON DELETE SET NULL
);

CREATE TABLE channel_members (
    user_id INTEGER NOT NULL,
    channel_id INTEGER NOT NULL,
    last_accessed INTEGER NOT NULL,
    PRIMARY KEY (channel_id, user_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
);

CREATE INDEX idx_channel_members_user ON channel_members(user_id, last_accessed DESC);

CREATE TABLE messages (
    id INTEGER PRIMARY KEY,
    channel_id INTEGER NOT NULL,
    author_id INTEGER,
    content TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    edited_timestamp INTEGER,
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE,
    FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE SET NULL
);

CREATE INDEX idx_messages_channel ON messages(channel_id, id DESC);
",
        ),
    ])
}
