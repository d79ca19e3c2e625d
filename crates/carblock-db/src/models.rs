//! Row mapping between SQLite and the carblock-types models.
//!
//! Ids are stored as UUID text and timestamps as fixed-width RFC 3339 UTC
//! text with millisecond precision, so comparing the text compares the time.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use carblock_types::{LicensePlate, MessageRecord, PlateNumber, User};

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub(crate) const USER_COLUMNS: &str = "id, telegram_id, username, registration_date";
pub(crate) const PLATE_COLUMNS: &str = "id, user_id, plate_number, created_at, updated_at";
pub(crate) const MESSAGE_COLUMNS: &str =
    "id, sender_id, recipient_id, license_plate_id, message_text, sent_at";

#[derive(Debug, thiserror::Error)]
#[error("unparseable timestamp {0:?}")]
struct BadTimestamp(String);

pub(crate) fn to_sql_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // Rows written by hand with datetime('now') have no zone and no 'T'.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}

fn column_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn column_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(BadTimestamp(raw)))
    })
}

pub(crate) fn column_plate(row: &Row<'_>, idx: usize) -> rusqlite::Result<PlateNumber> {
    let raw: String = row.get(idx)?;
    PlateNumber::parse(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Expects the columns in `USER_COLUMNS` order.
pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: column_uuid(row, 0)?,
        telegram_id: row.get(1)?,
        username: row.get(2)?,
        registered_at: column_timestamp(row, 3)?,
    })
}

/// Expects the columns in `PLATE_COLUMNS` order.
pub(crate) fn plate_from_row(row: &Row<'_>) -> rusqlite::Result<LicensePlate> {
    Ok(LicensePlate {
        id: column_uuid(row, 0)?,
        user_id: column_uuid(row, 1)?,
        plate_number: column_plate(row, 2)?,
        created_at: column_timestamp(row, 3)?,
        updated_at: column_timestamp(row, 4)?,
    })
}

/// Expects the columns in `MESSAGE_COLUMNS` order.
pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: column_uuid(row, 0)?,
        sender_id: column_uuid(row, 1)?,
        recipient_id: column_uuid(row, 2)?,
        license_plate_id: column_uuid(row, 3)?,
        message_text: row.get(4)?,
        sent_at: column_timestamp(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_lexically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 9, 59, 59).unwrap();
        let late = early + chrono::Duration::milliseconds(1);
        assert!(to_sql_timestamp(early) < to_sql_timestamp(late));
        assert_eq!(to_sql_timestamp(early), "2026-01-01T09:59:59.000Z");
    }

    #[test]
    fn parses_both_stored_forms() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(parse_timestamp(&to_sql_timestamp(at)), Some(at));
        assert_eq!(parse_timestamp("2026-03-04 05:06:07"), Some(at));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
