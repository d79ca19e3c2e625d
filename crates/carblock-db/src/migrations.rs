use rusqlite::Connection;
use tracing::{info, warn};

use crate::Database;
use crate::error::Result;

/// The tables the engine cannot run without.
pub const CORE_TABLES: [&str; 3] = ["users", "license_plates", "message_history"];

// Timestamps default to the same fixed-width text the Rust side writes.
const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id                  TEXT PRIMARY KEY,
        telegram_id         INTEGER NOT NULL UNIQUE,
        username            TEXT NOT NULL,
        registration_date   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    CREATE TABLE IF NOT EXISTS license_plates (
        id              TEXT PRIMARY KEY,
        user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        plate_number    TEXT NOT NULL UNIQUE
                            CHECK (length(plate_number) BETWEEN 1 AND 50),
        created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        CONSTRAINT unique_user_plate UNIQUE (user_id, plate_number)
    );

    CREATE TABLE IF NOT EXISTS message_history (
        id                  TEXT PRIMARY KEY,
        sender_id           TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        recipient_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        license_plate_id    TEXT NOT NULL REFERENCES license_plates(id) ON DELETE CASCADE,
        message_text        TEXT NOT NULL,
        sent_at             TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        CONSTRAINT no_self_message CHECK (sender_id <> recipient_id)
    );

    CREATE INDEX IF NOT EXISTS idx_users_telegram_id
        ON users(telegram_id);
    CREATE INDEX IF NOT EXISTS idx_license_plates_user_id
        ON license_plates(user_id);
    CREATE INDEX IF NOT EXISTS idx_license_plates_plate_number
        ON license_plates(plate_number);
    CREATE INDEX IF NOT EXISTS idx_message_history_sender_id
        ON message_history(sender_id);
    CREATE INDEX IF NOT EXISTS idx_message_history_recipient_id
        ON message_history(recipient_id);
    CREATE INDEX IF NOT EXISTS idx_message_history_sent_at
        ON message_history(sent_at);
    CREATE INDEX IF NOT EXISTS idx_message_history_license_plate_id
        ON message_history(license_plate_id);
    -- Rate-limit window scans
    CREATE INDEX IF NOT EXISTS idx_message_history_sender_sent_at
        ON message_history(sender_id, sent_at);

    -- Writes through the plate directory set updated_at themselves; this
    -- catches any other UPDATE that leaves it untouched.
    CREATE TRIGGER IF NOT EXISTS license_plates_touch_updated_at
        AFTER UPDATE ON license_plates
        FOR EACH ROW WHEN NEW.updated_at = OLD.updated_at
    BEGIN
        UPDATE license_plates
            SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = NEW.id;
    END;
";

const DROP: &str = "
    DROP TRIGGER IF EXISTS license_plates_touch_updated_at;
    DROP TABLE IF EXISTS message_history;
    DROP TABLE IF EXISTS license_plates;
    DROP TABLE IF EXISTS users;
";

/// Create tables, indexes and the plate timestamp trigger if absent.
/// Safe to run any number of times.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(SCHEMA)?;
    tx.commit()?;

    info!("Database schema ensured");
    Ok(())
}

/// True when every core table exists.
pub fn tables_exist(conn: &Connection) -> Result<bool> {
    let present: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN (?1, ?2, ?3)",
        CORE_TABLES,
        |row| row.get(0),
    )?;
    Ok(present == CORE_TABLES.len() as i64)
}

/// Every user table in the database, sorted by name.
pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(names)
}

/// Drop every carblock object and all data with it. Maintenance only.
pub fn drop_all(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(DROP)?;
    tx.commit()?;

    warn!("All carblock tables dropped");
    Ok(())
}

impl Database {
    pub fn ensure_schema(&self) -> Result<()> {
        self.with_conn(|conn| ensure_schema(conn))
    }

    pub fn tables_exist(&self) -> Result<bool> {
        self.with_conn(|conn| tables_exist(conn))
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| list_tables(conn))
    }

    pub fn drop_all(&self) -> Result<()> {
        self.with_conn(|conn| drop_all(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_snapshot(conn: &Connection) -> Vec<(String, String, Option<String>)> {
        let mut stmt = conn
            .prepare("SELECT type, name, sql FROM sqlite_master ORDER BY type, name")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let conn = fresh();
        assert!(!tables_exist(&conn).unwrap());

        ensure_schema(&conn).unwrap();
        let first = schema_snapshot(&conn);
        ensure_schema(&conn).unwrap();
        let second = schema_snapshot(&conn);

        assert_eq!(first, second);
        assert!(tables_exist(&conn).unwrap());
        assert!(first.iter().any(|(kind, name, _)| kind == "trigger"
            && name == "license_plates_touch_updated_at"));
    }

    #[test]
    fn lists_core_tables() {
        let conn = fresh();
        ensure_schema(&conn).unwrap();
        assert_eq!(
            list_tables(&conn).unwrap(),
            vec!["license_plates", "message_history", "users"]
        );
    }

    #[test]
    fn drop_all_removes_everything_and_can_be_rebuilt() {
        let conn = fresh();
        ensure_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (id, telegram_id, username) VALUES ('u1', 1, 'alice')",
            [],
        )
        .unwrap();

        drop_all(&conn).unwrap();
        assert!(!tables_exist(&conn).unwrap());
        assert!(list_tables(&conn).unwrap().is_empty());

        ensure_schema(&conn).unwrap();
        assert!(tables_exist(&conn).unwrap());
    }

    #[test]
    fn storage_rejects_self_addressed_messages() {
        let conn = fresh();
        ensure_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO users (id, telegram_id, username) VALUES ('u1', 1, 'alice');
             INSERT INTO license_plates (id, user_id, plate_number) VALUES ('p1', 'u1', 'ABC123');",
        )
        .unwrap();

        let err = conn
            .execute(
                "INSERT INTO message_history (id, sender_id, recipient_id, license_plate_id, message_text)
                 VALUES ('m1', 'u1', 'u1', 'p1', 'hi')",
                [],
            )
            .unwrap_err();
        assert_eq!(
            err.sqlite_error_code(),
            Some(rusqlite::ErrorCode::ConstraintViolation)
        );
    }

    #[test]
    fn trigger_refreshes_updated_at_on_untouched_update() {
        let conn = fresh();
        ensure_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO users (id, telegram_id, username) VALUES ('u1', 1, 'alice');
             INSERT INTO license_plates (id, user_id, plate_number, created_at, updated_at)
                VALUES ('p1', 'u1', 'ABC123', '2000-01-01T00:00:00.000Z', '2000-01-01T00:00:00.000Z');
             UPDATE license_plates SET plate_number = 'ABC124' WHERE id = 'p1';",
        )
        .unwrap();

        let updated: String = conn
            .query_row("SELECT updated_at FROM license_plates WHERE id = 'p1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert!(updated.as_str() > "2000-01-01T00:00:00.000Z");
    }
}
