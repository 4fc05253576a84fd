pub mod channels;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod tokens;
pub mod users;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Type alias for the shared database connection.
/// rusqlite is synchronous, we wrap in Arc<Mutex> for thread safety
/// with tokio::task::spawn_blocking for DB operations.
///
/// Holding the mutex is also what serializes a login snapshot against
/// concurrent REST writes: both run their transaction and their hub calls
/// while the guard is alive.
pub type DbPool = Arc<Mutex<Connection>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("noctes.db");
    let mut conn = Connection::open(&db_path)?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Run `f` against the locked connection on the blocking pool.
pub async fn run<T, E, F>(db: &DbPool, f: F) -> Result<T, E>
where
    F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut conn)
    })
    .await
    .map_err(StoreError::from)?
}
