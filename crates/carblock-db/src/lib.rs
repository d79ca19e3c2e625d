pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod migrations;
pub mod models;
pub mod plates;
pub mod pool;
pub mod rate_limit;
pub mod users;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, PoolConfig, RateLimitConfig};
pub use error::{ConnectionFault, DbError, ErrorKind, PlateError, Result, SendError};
pub use pool::{ConnectionFactory, Pool, PoolStatus, PooledConnection, SqliteFileFactory};
pub use rate_limit::RateLimiter;

/// The carblock engine: a connection pool plus the policy every operation
/// runs under. Share it behind an `Arc`; all state lives in the database.
pub struct Database {
    pool: Pool,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
}

impl Database {
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let factory =
            SqliteFileFactory::new(&config.database.path, config.pool.busy_timeout());
        let pool = Pool::new(&config.pool, factory)?;
        let db = Self::from_parts(pool, RateLimiter::new(&config.rate_limiting), clock)?;

        info!("Database opened at {}", config.database.path.display());
        Ok(db)
    }

    /// Assemble an engine from an existing pool. Brings the schema up to date
    /// and refuses to start if the core tables still are not there.
    pub fn from_parts(pool: Pool, limiter: RateLimiter, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = Self {
            pool,
            limiter,
            clock,
        };

        db.with_conn(|conn| {
            let fresh = !migrations::tables_exist(conn)?;
            migrations::ensure_schema(conn).map_err(|e| DbError::Schema(e.to_string()))?;
            if !migrations::tables_exist(conn)? {
                return Err(DbError::Schema("core tables missing after migration".into()));
            }
            if fresh {
                info!("Initialized empty database");
            }
            Ok(())
        })?;

        Ok(db)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run `f` on a pooled connection. The connection goes back to the pool
    /// on every path; if the error says the connection itself is broken it
    /// is discarded instead.
    pub fn with_conn<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Connection) -> std::result::Result<T, E>,
        E: From<DbError> + ConnectionFault,
    {
        let mut conn = self.pool.acquire()?;
        let result = f(&mut *conn);
        if let Err(e) = &result {
            if e.breaks_connection() {
                conn.discard();
            }
        }
        result
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction, committing on `Ok`
    /// and rolling back on `Err`.
    ///
    /// IMMEDIATE takes the database write lock before the first read, so
    /// two transactions can never both read a state and then both write
    /// based on it. Waiting for the lock is bounded by the busy timeout.
    pub fn with_tx<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> std::result::Result<T, E>,
        E: From<DbError> + ConnectionFault,
    {
        self.with_conn(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(DbError::from)?;
            let value = f(&tx)?;
            tx.commit().map_err(DbError::from)?;
            Ok(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::test_support::epoch;

    struct CountingFactory {
        inner: SqliteFileFactory,
        connects: Arc<AtomicUsize>,
    }

    impl ConnectionFactory for CountingFactory {
        fn connect(&self) -> rusqlite::Result<Connection> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.inner.connect()
        }
    }

    fn io_failure() -> DbError {
        DbError::from(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
            None,
        ))
    }

    #[test]
    fn connection_fault_replaces_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        let connects = Arc::new(AtomicUsize::new(0));
        let factory = CountingFactory {
            inner: SqliteFileFactory::new(dir.path().join("carblock.db"), Duration::from_secs(1)),
            connects: Arc::clone(&connects),
        };
        let config = PoolConfig {
            min_idle: 1,
            max_size: 2,
            ..PoolConfig::default()
        };
        let pool = Pool::new(&config, factory).unwrap();
        let db = Database::from_parts(
            pool,
            RateLimiter::new(&RateLimitConfig::default()),
            Arc::new(SystemClock),
        )
        .unwrap();
        let before = db.pool_status();
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        // An ordinary failure keeps the connection.
        let err = db
            .with_conn(|_| -> Result<()> { Err(DbError::Schema("nope".into())) })
            .unwrap_err();
        assert!(matches!(err, DbError::Schema(_)));
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        let err = db
            .with_conn(|_| -> Result<()> { Err(io_failure()) })
            .unwrap_err();
        assert!(err.breaks_connection());
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(db.pool_status(), before);

        // The replacement is usable.
        assert!(db.tables_exist().unwrap());
    }

    /// Records, on every reading, whether some other connection currently
    /// holds the database write lock.
    struct LockObservingClock {
        path: PathBuf,
        observed: Mutex<Vec<bool>>,
    }

    impl Clock for LockObservingClock {
        fn now(&self) -> DateTime<Utc> {
            let conn = Connection::open(&self.path).unwrap();
            conn.busy_timeout(Duration::ZERO).unwrap();
            let locked = conn.execute_batch("BEGIN IMMEDIATE").is_err();
            if !locked {
                conn.execute_batch("ROLLBACK").unwrap();
            }
            self.observed.lock().unwrap().push(locked);
            epoch()
        }
    }

    #[test]
    fn writes_read_the_clock_under_the_write_lock() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("carblock.db");
        let clock = Arc::new(LockObservingClock {
            path: config.database.path.clone(),
            observed: Mutex::new(Vec::new()),
        });
        let db = Database::open_with_clock(&config, clock.clone()).unwrap();

        let sender = db.ensure_user(1, "sender").unwrap();
        let owner = db.ensure_user(2, "owner").unwrap();
        db.register_plate(owner.id, "ABC123").unwrap();
        db.renumber_plate(owner.id, "ABC123", "ABC124").unwrap();
        db.send(sender.id, "ABC124", "hi").unwrap();

        let observed = clock.observed.lock().unwrap().clone();
        assert_eq!(observed, vec![true; 5]);
    }
}
