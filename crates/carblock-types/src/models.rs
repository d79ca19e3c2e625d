use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plate::PlateNumber;

/// A registered account. `telegram_id` is the external identity and never
/// changes once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub telegram_id: i64,
    pub username: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensePlate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plate_number: PlateNumber,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of message history. Append-only: these rows are also what the
/// rate limiter counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub license_plate_id: Uuid,
    pub message_text: String,
    pub sent_at: DateTime<Utc>,
}

/// A received message joined with the plate it was addressed to and the
/// sender's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub message: MessageRecord,
    pub plate_number: PlateNumber,
    pub sender_username: String,
}
