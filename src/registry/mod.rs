pub mod sqlite;

use async_trait::async_trait;

pub use sqlite::SqliteRegistry;

/// A chat registered to receive broadcast notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscriber {
    pub chat_id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("subscriber {0} already exists")]
    AlreadyExists(i64),
    #[error("subscriber {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistent set of subscribers. Implementations enforce uniqueness of
/// `chat_id` themselves; `list` always returns the complete set.
#[async_trait]
pub trait SubscriberRegistry: Send + Sync {
    async fn add(&self, chat_id: i64) -> Result<(), RegistryError>;
    async fn list(&self) -> Result<Vec<Subscriber>, RegistryError>;
    async fn remove(&self, chat_id: i64) -> Result<(), RegistryError>;
}
