use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use carblock_types::{InboxEntry, MessageRecord, PlateNumber, RateDecision};

use crate::Database;
use crate::error::{Result, SendError};
use crate::models::{MESSAGE_COLUMNS, column_plate, message_from_row, to_sql_timestamp};
use crate::plates::find_plate;
use crate::rate_limit::RateLimiter;
use crate::users::query_user_by_id;

/// Longest message body accepted, in characters.
pub const MAX_MESSAGE_LEN: usize = 4096;

impl Database {
    /// Send `text` from `sender_id` to whoever owns `plate`.
    ///
    /// Runs on one pooled connection inside one `BEGIN IMMEDIATE`
    /// transaction. Either the message is stored and counted, or nothing is
    /// written and the typed reason comes back.
    pub fn send(
        &self,
        sender_id: Uuid,
        plate: &str,
        text: &str,
    ) -> std::result::Result<MessageRecord, SendError> {
        validate_text(text)?;
        // A plate that cannot be normalized cannot be registered either.
        let plate = PlateNumber::parse(plate).map_err(|_| SendError::PlateNotFound)?;

        // The clock is read only once the write lock is held, so no committed
        // message can carry a later timestamp than the check's "now".
        self.with_tx(|tx| dispatch(tx, self.limiter(), sender_id, &plate, text, self.now()))
    }

    /// How many more messages `sender_id` may send right now.
    pub fn remaining_messages(&self, sender_id: Uuid) -> Result<u32> {
        let now = self.now();
        self.with_conn(|conn| Ok(self.limiter().remaining(conn, sender_id, now)?))
    }

    /// The sender's latest messages, newest first.
    pub fn recent_sent(&self, sender_id: Uuid, limit: u32) -> Result<Vec<MessageRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM message_history
                 WHERE sender_id = ?1
                 ORDER BY sent_at DESC
                 LIMIT ?2"
            ))?;
            let messages = stmt
                .query_map((sender_id.to_string(), limit), message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(messages)
        })
    }

    /// Messages received by `recipient_id`, newest first, with the plate
    /// each was addressed to and the sender's name.
    pub fn inbox(&self, recipient_id: Uuid, limit: u32) -> Result<Vec<InboxEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.sender_id, m.recipient_id, m.license_plate_id,
                        m.message_text, m.sent_at, lp.plate_number, u.username
                 FROM message_history m
                 JOIN license_plates lp ON lp.id = m.license_plate_id
                 JOIN users u ON u.id = m.sender_id
                 WHERE m.recipient_id = ?1
                 ORDER BY m.sent_at DESC
                 LIMIT ?2",
            )?;
            let entries = stmt
                .query_map((recipient_id.to_string(), limit), |row| {
                    Ok(InboxEntry {
                        message: message_from_row(row)?,
                        plate_number: column_plate(row, 6)?,
                        sender_username: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(entries)
        })
    }
}

fn validate_text(text: &str) -> std::result::Result<(), SendError> {
    if text.trim().is_empty() || text.chars().count() > MAX_MESSAGE_LEN {
        return Err(SendError::InvalidText {
            max: MAX_MESSAGE_LEN,
        });
    }
    Ok(())
}

/// One send, on a connection the caller has already put inside a
/// write-locked transaction. Returns before writing on every rejection.
pub fn dispatch(
    conn: &Connection,
    limiter: &RateLimiter,
    sender_id: Uuid,
    plate: &PlateNumber,
    text: &str,
    now: DateTime<Utc>,
) -> std::result::Result<MessageRecord, SendError> {
    if query_user_by_id(conn, sender_id)?.is_none() {
        return Err(SendError::UnknownSender);
    }

    let target = find_plate(conn, plate)?.ok_or(SendError::PlateNotFound)?;
    if target.user_id == sender_id {
        debug!(sender_id = %sender_id, plate = %plate, "Rejected message to own plate");
        return Err(SendError::SelfMessage);
    }

    if let RateDecision::Denied { retry_after } =
        limiter.check_and_reserve(conn, sender_id, now)?
    {
        return Err(SendError::RateLimited { retry_after });
    }

    let record = MessageRecord {
        id: Uuid::new_v4(),
        sender_id,
        recipient_id: target.user_id,
        license_plate_id: target.id,
        message_text: text.to_owned(),
        sent_at: now,
    };
    conn.execute(
        "INSERT INTO message_history
            (id, sender_id, recipient_id, license_plate_id, message_text, sent_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        (
            record.id.to_string(),
            record.sender_id.to_string(),
            record.recipient_id.to_string(),
            record.license_plate_id.to_string(),
            &record.message_text,
            to_sql_timestamp(record.sent_at),
        ),
    )?;

    info!(
        message_id = %record.id,
        sender_id = %sender_id,
        recipient_id = %record.recipient_id,
        plate = %plate,
        "Message dispatched"
    );
    Ok(record)
}
