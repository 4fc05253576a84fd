//! REST surface. Handlers validate input, run their store work through
//! `db::run` and notify the hub from inside the same locked closure.

pub mod auth;
pub mod channels;
pub mod error;
pub mod messages;
pub mod users;
