use crate::error::DbError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

const MEMORY_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(u32::MAX as u64);

/// Opens a connection pool to the SQLite file at `path`, creating it if absent.
///
/// `":memory:"` opens a private in-memory database. It lives on a single
/// connection that is never recycled, since closing it would drop the data.
/// Acquiring that connection waits for the current holder without a deadline.
pub async fn connect(path: &str) -> Result<SqlitePool, DbError> {
    if path == ":memory:" {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(MEMORY_ACQUIRE_TIMEOUT)
            .test_before_acquire(false)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        return Ok(pool);
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Applies the embedded schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
    // Use a relative path from the crate root
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
