use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use carblock_types::RateDecision;

use crate::config::RateLimitConfig;
use crate::models::{column_timestamp, to_sql_timestamp};

/// Sliding-window limiter over `message_history`.
///
/// Nothing is counted in memory. Every decision is a query over the sender's
/// stored messages in `(now - window, now]`, so the limit survives restarts
/// and holds across processes sharing the database. The caller must run the
/// check and the insert that follows it in one write-locked transaction.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_messages: u32,
    window: chrono::Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_messages: config.max_messages,
            window: config.window(),
        }
    }

    pub fn max_messages(&self) -> u32 {
        self.max_messages
    }

    pub fn window(&self) -> chrono::Duration {
        self.window
    }

    /// Decide whether `sender_id` may send at `now`. An `Allowed` decision
    /// reserves nothing by itself; the message insert in the same
    /// transaction is what counts against later windows.
    pub fn check_and_reserve(
        &self,
        conn: &Connection,
        sender_id: Uuid,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<RateDecision> {
        let sent = self.count_in_window(conn, sender_id, now)?;
        if sent < self.max_messages {
            return Ok(RateDecision::Allowed {
                remaining: self.max_messages - sent,
            });
        }

        // The send becomes possible once enough records leave the window to
        // bring the count below the limit.
        let gate: DateTime<Utc> = conn.query_row(
            "SELECT sent_at FROM message_history
             WHERE sender_id = ?1 AND sent_at > ?2 AND sent_at <= ?3
             ORDER BY sent_at ASC
             LIMIT 1 OFFSET ?4",
            (
                sender_id.to_string(),
                to_sql_timestamp(self.window_start(now)),
                to_sql_timestamp(now),
                sent - self.max_messages,
            ),
            |row| column_timestamp(row, 0),
        )?;
        let retry_after = gate
            .checked_add_signed(self.window)
            .and_then(|exit| (exit - now).to_std().ok())
            .unwrap_or(Duration::ZERO);

        info!(
            sender_id = %sender_id,
            sent,
            limit = self.max_messages,
            retry_after_secs = retry_after.as_secs(),
            "Rate limit reached"
        );
        Ok(RateDecision::Denied { retry_after })
    }

    /// Messages `sender_id` could still send at `now`.
    pub fn remaining(
        &self,
        conn: &Connection,
        sender_id: Uuid,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<u32> {
        let sent = self.count_in_window(conn, sender_id, now)?;
        Ok(self.max_messages.saturating_sub(sent))
    }

    /// Exclusive lower bound of the window ending at `now`.
    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn count_in_window(
        &self,
        conn: &Connection,
        sender_id: Uuid,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<u32> {
        conn.query_row(
            "SELECT COUNT(*) FROM message_history
             WHERE sender_id = ?1 AND sent_at > ?2 AND sent_at <= ?3",
            (
                sender_id.to_string(),
                to_sql_timestamp(self.window_start(now)),
                to_sql_timestamp(now),
            ),
            |row| row.get(0),
        )
    }
}
