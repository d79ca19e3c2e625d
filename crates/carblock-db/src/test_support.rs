use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use crate::{Clock, Config, Database, ManualClock};

/// An engine over a throwaway on-disk database with a hand-driven clock.
pub(crate) struct Fixture {
    pub db: Database,
    pub clock: Arc<ManualClock>,
    _dir: TempDir,
}

pub(crate) fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

impl Fixture {
    pub fn new(max_messages: u32) -> Self {
        Self::with_pool(max_messages, 1, 4)
    }

    pub fn with_pool(max_messages: u32, min_idle: usize, max_size: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("carblock.db");
        config.pool.min_idle = min_idle;
        config.pool.max_size = max_size;
        config.pool.acquire_timeout_ms = 500;
        config.rate_limiting.max_messages = max_messages;

        let clock = Arc::new(ManualClock::new(epoch()));
        let db = Database::open_with_clock(&config, clock.clone()).unwrap();
        Self {
            db,
            clock,
            _dir: dir,
        }
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn message_count(&self) -> i64 {
        self.db
            .with_conn(|conn| -> crate::Result<i64> {
                Ok(conn.query_row("SELECT COUNT(*) FROM message_history", [], |r| r.get(0))?)
            })
            .unwrap()
    }

    /// Move the clock to `minutes` after the fixture's starting instant.
    pub fn at_minute(&self, minutes: i64) {
        self.clock.set(epoch() + Duration::minutes(minutes));
    }
}
