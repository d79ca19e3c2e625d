use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{DbError, Result};

/// Upper bound on `pool.max_size`. SQLite serializes writers anyway.
pub const MAX_POOL_SIZE: usize = 1024;

/// Upper bound on `rate_limiting.window_secs`: one year.
pub const MAX_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;

/// Engine configuration: where the database lives, how the connection pool
/// is bounded, and the rate-limit policy.
///
/// Values come from an optional YAML file, then environment variables, with
/// the environment winning.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub pool: PoolConfig,
    pub rate_limiting: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("carblock.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Connections opened up front and kept warm.
    pub min_idle: usize,
    /// Hard cap on simultaneously open connections.
    pub max_size: usize,
    /// How long `acquire` waits at the cap before giving up.
    pub acquire_timeout_ms: u64,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 1,
            max_size: 10,
            acquire_timeout_ms: 5_000,
            busy_timeout_ms: 5_000,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_idle == 0 {
            return Err(DbError::Config("pool.min_idle must be at least 1".into()));
        }
        if self.max_size < self.min_idle {
            return Err(DbError::Config(format!(
                "pool.max_size ({}) must be >= pool.min_idle ({})",
                self.max_size, self.min_idle
            )));
        }
        if self.max_size > MAX_POOL_SIZE {
            return Err(DbError::Config(format!(
                "pool.max_size ({}) must be <= {}",
                self.max_size, MAX_POOL_SIZE
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(alias = "max_messages_per_hour")]
    pub max_messages: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: 3,
            window_secs: 60 * 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> chrono::Duration {
        i64::try_from(self.window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_messages == 0 {
            return Err(DbError::Config(
                "rate_limiting.max_messages must be at least 1".into(),
            ));
        }
        if self.window_secs == 0 {
            return Err(DbError::Config(
                "rate_limiting.window_secs must be positive".into(),
            ));
        }
        if self.window_secs > MAX_WINDOW_SECS {
            return Err(DbError::Config(format!(
                "rate_limiting.window_secs ({}) must be <= {}",
                self.window_secs, MAX_WINDOW_SECS
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load from an optional YAML file, then apply process environment
    /// overrides. Call `dotenvy::dotenv()` first if a `.env` should count.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let base = match file {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DbError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| DbError::Config(format!("invalid config: {}", e)))
    }

    /// Apply overrides from `lookup` (normally the process environment) and
    /// validate the result.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("CARBLOCK_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        override_num(&lookup, "CARBLOCK_POOL_MIN_IDLE", &mut self.pool.min_idle)?;
        override_num(&lookup, "CARBLOCK_POOL_MAX_SIZE", &mut self.pool.max_size)?;
        override_num(
            &lookup,
            "CARBLOCK_POOL_ACQUIRE_TIMEOUT_MS",
            &mut self.pool.acquire_timeout_ms,
        )?;
        override_num(&lookup, "CARBLOCK_BUSY_TIMEOUT_MS", &mut self.pool.busy_timeout_ms)?;
        override_num(
            &lookup,
            "MAX_MESSAGES_PER_HOUR",
            &mut self.rate_limiting.max_messages,
        )?;
        override_num(
            &lookup,
            "CARBLOCK_RATE_WINDOW_SECS",
            &mut self.rate_limiting.window_secs,
        )?;

        self.validate()?;
        debug!(config = ?self, "configuration loaded");
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        self.rate_limiting.validate()
    }
}

fn override_num<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| DbError::Config(format!("{}={:?}: {}", key, raw, e)))?;
    }
    Ok(())
}
