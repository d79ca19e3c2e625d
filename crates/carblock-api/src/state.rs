use std::sync::Arc;

use tracing::error;

use carblock_db::{Database, DbError, PoolStatus};

/// Cheap to clone; hand one to every handler.
#[derive(Clone)]
pub struct CarblockService {
    db: Arc<Database>,
}

impl CarblockService {
    pub fn new(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    pub fn from_shared(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.db.pool_status()
    }

    /// Run `f` off the async runtime. A worker that panics or is cancelled
    /// surfaces as `DbError::Worker` in the operation's own error type.
    pub(crate) async fn run<T, E, F>(&self, op: &'static str, f: F) -> Result<T, E>
    where
        F: FnOnce(&Database) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<DbError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!(op, "spawn_blocking join error: {}", e);
                E::from(DbError::Worker(e.to_string()))
            })?
    }
}
