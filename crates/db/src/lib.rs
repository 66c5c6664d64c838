pub mod migrate;
pub mod repo;

use cinemeld_core::error::{Classify, ErrorKind};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl Classify for DbError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Create a SQLite connection pool with WAL mode enabled.
pub async fn connect(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let opts = SqliteConnectOptions::from_str(db_path)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await?;

    Ok(pool)
}

/// Connect and bring the schema up to date.
pub async fn open(db_path: &str) -> Result<SqlitePool, DbError> {
    let pool = connect(db_path).await?;
    migrate::run(&pool).await?;
    Ok(pool)
}

/// Current time as unix seconds, the unit every timestamp column uses.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
