//! Noctes chat server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod hub;
pub mod ids;
pub mod routes;
pub mod snowflake;
pub mod state;
pub mod ws;
