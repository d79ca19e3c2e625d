use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{DbError, Result};

/// Waiters wake up at least this often to check whether a slot freed up
/// because a connection was discarded rather than returned.
const RECHECK_INTERVAL: Duration = Duration::from_millis(25);

/// Supplies raw connections to the pool.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self) -> rusqlite::Result<Connection>;
}

/// Opens connections to an on-disk SQLite database.
pub struct SqliteFileFactory {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteFileFactory {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }
}

impl ConnectionFactory for SqliteFileFactory {
    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;

        // Lock waits are bounded; a send stuck behind another writer fails
        // with SQLITE_BUSY instead of hanging.
        conn.busy_timeout(self.busy_timeout)?;
        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(conn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
    pub max_size: usize,
}

/// Bounded pool of SQLite connections.
///
/// Idle connections sit in a channel; `open` counts every live connection,
/// idle or lent out, and never exceeds `max_size`.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    factory: Box<dyn ConnectionFactory>,
    idle_tx: Sender<Connection>,
    idle_rx: Receiver<Connection>,
    open: AtomicUsize,
    max_size: usize,
    acquire_timeout: Duration,
}

impl Pool {
    /// Build the pool and open `min_idle` connections up front. Failing to
    /// open any of them is an error: a pool that cannot reach the database
    /// at startup should not start.
    pub fn new(config: &PoolConfig, factory: impl ConnectionFactory + 'static) -> Result<Self> {
        config.validate()?;

        let (idle_tx, idle_rx) = crossbeam_channel::bounded(config.max_size);
        let pool = Self {
            inner: Arc::new(PoolInner {
                factory: Box::new(factory),
                idle_tx,
                idle_rx,
                open: AtomicUsize::new(0),
                max_size: config.max_size,
                acquire_timeout: config.acquire_timeout(),
            }),
        };

        for _ in 0..config.min_idle {
            let conn = pool.inner.factory.connect()?;
            pool.inner.open.fetch_add(1, Ordering::SeqCst);
            pool.inner.push_idle(conn);
        }

        info!(
            min_idle = config.min_idle,
            max_size = config.max_size,
            "Connection pool ready"
        );
        Ok(pool)
    }

    /// Borrow a connection for one logical operation.
    ///
    /// Reuses an idle connection if there is one, opens a new one while under
    /// the cap, and otherwise waits for a release. Gives up with
    /// `PoolExhausted` once the acquire timeout has elapsed.
    pub fn acquire(&self) -> Result<PooledConnection> {
        let started = Instant::now();
        let deadline = started + self.inner.acquire_timeout;

        loop {
            if let Ok(conn) = self.inner.idle_rx.try_recv() {
                return Ok(self.lend(conn));
            }

            if self.inner.try_reserve_slot() {
                match self.inner.factory.connect() {
                    Ok(conn) => {
                        debug!(open = self.inner.open(), "Opened pooled connection");
                        return Ok(self.lend(conn));
                    }
                    Err(e) => {
                        self.inner.open.fetch_sub(1, Ordering::SeqCst);
                        return Err(e.into());
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = now - started;
                warn!(?waited, max_size = self.inner.max_size, "Connection pool exhausted");
                return Err(DbError::PoolExhausted { waited });
            }

            match self
                .inner
                .idle_rx
                .recv_timeout((deadline - now).min(RECHECK_INTERVAL))
            {
                Ok(conn) => return Ok(self.lend(conn)),
                Err(RecvTimeoutError::Timeout) => continue,
                // PoolInner holds the sender, so this cannot happen while we
                // hold a reference to it.
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DbError::PoolExhausted {
                        waited: started.elapsed(),
                    });
                }
            }
        }
    }

    /// Give a connection back. Equivalent to dropping the handle.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    pub fn status(&self) -> PoolStatus {
        let open = self.inner.open();
        let idle = self.inner.idle_rx.len();
        PoolStatus {
            open,
            idle,
            in_use: open.saturating_sub(idle),
            max_size: self.inner.max_size,
        }
    }

    fn lend(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            broken: false,
        }
    }
}

impl PoolInner {
    fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    fn try_reserve_slot(&self) -> bool {
        self.open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_size).then_some(n + 1)
            })
            .is_ok()
    }

    fn push_idle(&self, conn: Connection) {
        // Capacity equals max_size and open <= max_size, so this only fails
        // if the accounting is off; drop the connection rather than block.
        if self.idle_tx.try_send(conn).is_err() {
            self.open.fetch_sub(1, Ordering::SeqCst);
            warn!("Idle queue full, dropping connection");
        }
    }

    fn reclaim(&self, conn: Connection, mut broken: bool) {
        if !broken && !conn.is_autocommit() {
            // The borrower bailed out mid-transaction.
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "Rollback on release failed");
                broken = true;
            }
        }

        if !broken {
            self.push_idle(conn);
            return;
        }

        drop(conn);
        self.open.fetch_sub(1, Ordering::SeqCst);
        warn!("Discarded broken connection");

        if self.try_reserve_slot() {
            match self.factory.connect() {
                Ok(fresh) => self.push_idle(fresh),
                Err(e) => {
                    self.open.fetch_sub(1, Ordering::SeqCst);
                    warn!(error = %e, "Could not open replacement connection");
                }
            }
        }
    }
}

/// A connection on loan from the pool. Returned when dropped, on every exit
/// path including panics.
pub struct PooledConnection {
    // Some until drop
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    broken: bool,
}

impl PooledConnection {
    /// Mark the connection unusable; it is closed and replaced instead of
    /// going back to the idle queue.
    pub fn discard(&mut self) {
        self.broken = true;
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("pooled connection is present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("pooled connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.reclaim(conn, self.broken);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

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

    struct Unreachable;

    impl ConnectionFactory for Unreachable {
        fn connect(&self) -> rusqlite::Result<Connection> {
            Connection::open("/nonexistent-dir/for/sure/carblock.db")
        }
    }

    fn config(min_idle: usize, max_size: usize, acquire_timeout_ms: u64) -> PoolConfig {
        PoolConfig {
            min_idle,
            max_size,
            acquire_timeout_ms,
            ..PoolConfig::default()
        }
    }

    fn counting_pool(
        dir: &tempfile::TempDir,
        config: &PoolConfig,
    ) -> (Pool, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let factory = CountingFactory {
            inner: SqliteFileFactory::new(dir.path().join("pool.db"), Duration::from_secs(1)),
            connects: Arc::clone(&connects),
        };
        (Pool::new(config, factory).unwrap(), connects)
    }

    #[test]
    fn opens_min_idle_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, connects) = counting_pool(&dir, &config(2, 5, 100));
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(
            pool.status(),
            PoolStatus {
                open: 2,
                idle: 2,
                in_use: 0,
                max_size: 5
            }
        );
    }

    #[test]
    fn release_returns_connection_for_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, connects) = counting_pool(&dir, &config(1, 3, 100));

        let conn = pool.acquire().unwrap();
        assert_eq!(pool.status().in_use, 1);
        pool.release(conn);
        assert_eq!(pool.status().idle, 1);

        let _again = pool.acquire().unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn grows_up_to_cap_then_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _) = counting_pool(&dir, &config(1, 2, 50));

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.status().open, 2);

        let err = pool.acquire().err().unwrap();
        assert!(matches!(err, DbError::PoolExhausted { .. }));
        assert_eq!(pool.status().open, 2);

        drop(a);
        drop(b);
        assert_eq!(pool.status().idle, 2);
    }

    #[test]
    fn waiter_receives_released_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _) = counting_pool(&dir, &config(1, 1, 2_000));

        let held = pool.acquire().unwrap();
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(held);
        });

        let conn = pool.acquire().unwrap();
        assert_eq!(pool.status().in_use, 1);
        drop(conn);
        releaser.join().unwrap();
    }

    #[test]
    fn discarded_connection_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, connects) = counting_pool(&dir, &config(1, 1, 100));

        let mut conn = pool.acquire().unwrap();
        conn.discard();
        drop(conn);

        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().open, 1);
        assert_eq!(pool.status().idle, 1);
    }

    #[test]
    fn open_transaction_is_rolled_back_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _) = counting_pool(&dir, &config(1, 1, 100));

        {
            let conn = pool.acquire().unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER); BEGIN; INSERT INTO t VALUES (1);")
                .unwrap();
            assert!(!conn.is_autocommit());
        }

        let conn = pool.acquire().unwrap();
        assert!(conn.is_autocommit());
        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn unreachable_database_fails_at_startup() {
        let err = Pool::new(&config(1, 2, 100), Unreachable).err().unwrap();
        assert!(matches!(err, DbError::Sqlite(_)));
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let factory = SqliteFileFactory::new(dir.path().join("pool.db"), Duration::from_secs(1));
        let err = Pool::new(&config(0, 2, 100), factory).err().unwrap();
        assert!(matches!(err, DbError::Config(_)));
    }
}
