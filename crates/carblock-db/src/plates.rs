use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use carblock_types::{LicensePlate, PlateNumber, User};

use crate::Database;
use crate::error::{PlateError, Result, is_unique_violation};
use crate::models::{PLATE_COLUMNS, plate_from_row, to_sql_timestamp, user_from_row};
use crate::users::query_user_by_id;

impl Database {
    /// Who owns `plate`, after normalization.
    pub fn resolve_owner(&self, plate: &str) -> std::result::Result<User, PlateError> {
        let plate = PlateNumber::parse(plate)?;
        self.with_conn(|conn| resolve_owner(conn, &plate)?.ok_or(PlateError::NotFound))
    }

    pub fn find_plate(&self, plate: &str) -> std::result::Result<Option<LicensePlate>, PlateError> {
        let plate = PlateNumber::parse(plate)?;
        self.with_conn(|conn| Ok(find_plate(conn, &plate)?))
    }

    pub fn register_plate(
        &self,
        user_id: Uuid,
        plate: &str,
    ) -> std::result::Result<LicensePlate, PlateError> {
        let plate = PlateNumber::parse(plate)?;
        self.with_tx(|tx| register_plate(tx, user_id, &plate, self.now()))
    }

    /// The user's plates, newest first.
    pub fn plates_for_user(&self, user_id: Uuid) -> Result<Vec<LicensePlate>> {
        self.with_conn(|conn| plates_for_user(conn, user_id))
    }

    /// Unregister a plate. Only its owner may do this. Messages addressed
    /// via the plate are deleted with it.
    pub fn remove_plate(&self, user_id: Uuid, plate: &str) -> std::result::Result<(), PlateError> {
        let plate = PlateNumber::parse(plate)?;
        self.with_tx(|tx| remove_plate(tx, user_id, &plate))
    }

    /// Let an owner correct a plate number in place, keeping its history.
    pub fn renumber_plate(
        &self,
        user_id: Uuid,
        old: &str,
        new: &str,
    ) -> std::result::Result<LicensePlate, PlateError> {
        let old = PlateNumber::parse(old)?;
        let new = PlateNumber::parse(new)?;
        self.with_tx(|tx| renumber_plate(tx, user_id, &old, &new, self.now()))
    }
}

pub fn find_plate(conn: &Connection, plate: &PlateNumber) -> Result<Option<LicensePlate>> {
    let found = conn
        .query_row(
            &format!("SELECT {PLATE_COLUMNS} FROM license_plates WHERE plate_number = ?1"),
            [plate.as_str()],
            plate_from_row,
        )
        .optional()?;
    Ok(found)
}

pub fn resolve_owner(conn: &Connection, plate: &PlateNumber) -> Result<Option<User>> {
    let owner = conn
        .query_row(
            "SELECT u.id, u.telegram_id, u.username, u.registration_date
             FROM license_plates lp
             JOIN users u ON u.id = lp.user_id
             WHERE lp.plate_number = ?1",
            [plate.as_str()],
            user_from_row,
        )
        .optional()?;
    Ok(owner)
}

/// Register `plate` to `user_id`. Fails without writing anything if the
/// plate is already taken, by anyone.
pub fn register_plate(
    conn: &Connection,
    user_id: Uuid,
    plate: &PlateNumber,
    now: DateTime<Utc>,
) -> std::result::Result<LicensePlate, PlateError> {
    if query_user_by_id(conn, user_id)?.is_none() {
        return Err(PlateError::OwnerMismatch);
    }
    if let Some(existing) = find_plate(conn, plate)? {
        return Err(conflict_with(&existing, user_id));
    }

    let registered = LicensePlate {
        id: Uuid::new_v4(),
        user_id,
        plate_number: plate.clone(),
        created_at: now,
        updated_at: now,
    };
    let ts = to_sql_timestamp(now);
    let inserted = conn.execute(
        "INSERT INTO license_plates (id, user_id, plate_number, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        (
            registered.id.to_string(),
            user_id.to_string(),
            plate.as_str(),
            &ts,
            &ts,
        ),
    );
    match inserted {
        Ok(_) => {}
        // Only reachable if something wrote outside an immediate transaction.
        Err(e) if is_unique_violation(&e) => return Err(PlateError::DuplicatePlate),
        Err(e) => return Err(e.into()),
    }

    info!(user_id = %user_id, plate = %plate, "Registered plate");
    Ok(registered)
}

pub fn plates_for_user(conn: &Connection, user_id: Uuid) -> Result<Vec<LicensePlate>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PLATE_COLUMNS} FROM license_plates
         WHERE user_id = ?1
         ORDER BY created_at DESC, plate_number"
    ))?;
    let plates = stmt
        .query_map([user_id.to_string()], plate_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(plates)
}

pub fn remove_plate(
    conn: &Connection,
    user_id: Uuid,
    plate: &PlateNumber,
) -> std::result::Result<(), PlateError> {
    let existing = find_plate(conn, plate)?.ok_or(PlateError::NotFound)?;
    if existing.user_id != user_id {
        return Err(PlateError::OwnerMismatch);
    }

    conn.execute(
        "DELETE FROM license_plates WHERE id = ?1",
        [existing.id.to_string()],
    )?;
    info!(user_id = %user_id, plate = %plate, "Removed plate");
    Ok(())
}

pub fn renumber_plate(
    conn: &Connection,
    user_id: Uuid,
    old: &PlateNumber,
    new: &PlateNumber,
    now: DateTime<Utc>,
) -> std::result::Result<LicensePlate, PlateError> {
    let existing = find_plate(conn, old)?.ok_or(PlateError::NotFound)?;
    if existing.user_id != user_id {
        return Err(PlateError::OwnerMismatch);
    }
    if old == new {
        return Ok(existing);
    }
    if let Some(taken) = find_plate(conn, new)? {
        return Err(conflict_with(&taken, user_id));
    }

    conn.execute(
        "UPDATE license_plates SET plate_number = ?1, updated_at = ?2 WHERE id = ?3",
        (new.as_str(), to_sql_timestamp(now), existing.id.to_string()),
    )?;
    debug!(from = %old, to = %new, "Renumbered plate");

    // Read back so the result reflects anything the touch trigger did.
    find_plate(conn, new)?.ok_or(PlateError::NotFound)
}

fn conflict_with(existing: &LicensePlate, user_id: Uuid) -> PlateError {
    if existing.user_id == user_id {
        PlateError::AlreadyRegistered
    } else {
        PlateError::DuplicatePlate
    }
}
