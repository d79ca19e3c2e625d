use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use carblock_types::User;

use crate::Database;
use crate::error::Result;
use crate::models::{USER_COLUMNS, to_sql_timestamp, user_from_row};

impl Database {
    /// Register the account on first contact; later calls return the stored
    /// user unchanged. The bot layer calls this before any other operation.
    pub fn ensure_user(&self, telegram_id: i64, username: &str) -> Result<User> {
        self.with_tx(|tx| ensure_user(tx, telegram_id, username, self.now()))
    }

    pub fn user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn user_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>> {
        self.with_conn(|conn| query_user_by_telegram_id(conn, telegram_id))
    }

    pub fn update_username(&self, id: Uuid, username: &str) -> Result<Option<User>> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE users SET username = ?1 WHERE id = ?2",
                (username, id.to_string()),
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_user_by_id(tx, id)
        })
    }

    /// Delete the account. Its plates and every message it sent or received
    /// go with it.
    pub fn delete_user(&self, id: Uuid) -> Result<bool> {
        let deleted = self.with_conn(|conn| -> Result<usize> {
            Ok(conn.execute("DELETE FROM users WHERE id = ?1", [id.to_string()])?)
        })?;
        if deleted > 0 {
            info!(user_id = %id, "Deleted user");
        }
        Ok(deleted > 0)
    }
}

pub fn ensure_user(
    conn: &Connection,
    telegram_id: i64,
    username: &str,
    now: DateTime<Utc>,
) -> Result<User> {
    let inserted = conn.execute(
        "INSERT INTO users (id, telegram_id, username, registration_date)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(telegram_id) DO NOTHING",
        (
            Uuid::new_v4().to_string(),
            telegram_id,
            username,
            to_sql_timestamp(now),
        ),
    )?;
    if inserted > 0 {
        info!(telegram_id, "Registered new user");
    }

    let user = conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?1"),
        [telegram_id],
        user_from_row,
    )?;
    Ok(user)
}

pub fn query_user_by_id(conn: &Connection, id: Uuid) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [id.to_string()],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn query_user_by_telegram_id(conn: &Connection, telegram_id: i64) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?1"),
            [telegram_id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}
