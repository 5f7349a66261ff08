use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{RegistryError, Subscriber, SubscriberRegistry};
use crate::config::RegistryConfig;

/// SQLite-backed subscriber registry. The primary key on `chat_id` is what
/// enforces uniqueness; duplicate inserts surface as `AlreadyExists`.
#[derive(Clone)]
pub struct SqliteRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRegistry {
    /// Open the database, retrying up to `connect_attempts` times.
    pub async fn connect(config: &RegistryConfig) -> Result<Self> {
        let attempts = config.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::open(&config.database_path) {
                Ok(registry) => return Ok(registry),
                Err(e) if attempt < attempts => {
                    warn!(
                        "Failed to open subscriber registry (attempt {}/{}): {:#}",
                        attempt, attempts, e
                    );
                    tokio::time::sleep(Duration::from_secs(config.retry_delay_secs)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to open subscriber registry after {} attempts", attempt)
                    })
                }
            }
        }
    }

    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        Self::run_migrations(&conn)?;

        info!("Subscriber registry initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS subscribers (
                chat_id INTEGER PRIMARY KEY,
                subscribed_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )
        .context("Failed to run registry migrations")?;
        Ok(())
    }
}

#[async_trait]
impl SubscriberRegistry for SqliteRegistry {
    async fn add(&self, chat_id: i64) -> Result<(), RegistryError> {
        let conn = self.conn.lock().await;
        match conn.execute(
            "INSERT INTO subscribers (chat_id) VALUES (?1)",
            rusqlite::params![chat_id],
        ) {
            Ok(_) => Ok(()),
            Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                Err(RegistryError::AlreadyExists(chat_id))
            }
            Err(e) => Err(anyhow::Error::new(e)
                .context("Failed to insert subscriber")
                .into()),
        }
    }

    async fn list(&self) -> Result<Vec<Subscriber>, RegistryError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT chat_id FROM subscribers ORDER BY subscribed_at ASC, chat_id ASC")
            .context("Failed to prepare subscriber query")?;
        let subscribers = stmt
            .query_map([], |row| Ok(Subscriber { chat_id: row.get(0)? }))
            .context("Failed to query subscribers")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect subscribers")?;
        Ok(subscribers)
    }

    async fn remove(&self, chat_id: i64) -> Result<(), RegistryError> {
        let conn = self.conn.lock().await;
        let affected = conn
            .execute(
                "DELETE FROM subscribers WHERE chat_id = ?1",
                rusqlite::params![chat_id],
            )
            .context("Failed to delete subscriber")?;
        if affected == 0 {
            return Err(RegistryError::NotFound(chat_id));
        }
        Ok(())
    }
}
