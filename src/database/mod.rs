pub mod announcement_repo;
pub mod chat_repo;
pub mod presence_repo;
pub mod relationship_repo;
pub mod schema;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// UTC timestamp in RFC 3339 with millisecond precision, evaluated by SQLite.
pub const SQL_NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

pub async fn connect(database_url: &str) -> sqlx::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    schema::migrate(&pool).await?;
    Ok(pool)
}

/// Private in-memory database, migrated. SQLite gives every connection its
/// own memory database, so the pool is pinned to one long-lived connection.
pub async fn memory_pool() -> sqlx::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    schema::migrate(&pool).await?;
    Ok(pool)
}
