//! Database schema migrations
//!
//! Schema only. Re-encrypting field contents under a new key is the job of
//! [`crate::key_migration`].

use crate::Result;
use rusqlite::Connection;

const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::debug!(
        "Running migrations: current_version={}, target_version={}",
        current_version,
        SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    if current_version != SCHEMA_VERSION {
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Current schema version; 0 for a fresh database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result = conn.query_row(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(v) => Ok(v),
        Err(_) => Ok(0),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    )?;

    let rows = conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    if rows > 0 {
        tracing::debug!("Inserted schema version {}", version);
    }
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS cards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            card_name TEXT NOT NULL,
            card_number TEXT NOT NULL,
            cvv_code TEXT NOT NULL,
            expiry_date TEXT NOT NULL,
            pin TEXT NOT NULL DEFAULT '',
            is_favorited INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )?;
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    // Existing rows get an empty timestamp; new writes always set both
    conn.execute_batch(
        r#"
        ALTER TABLE cards ADD COLUMN created_at TEXT NOT NULL DEFAULT '';
        ALTER TABLE cards ADD COLUMN updated_at TEXT NOT NULL DEFAULT '';
        CREATE INDEX IF NOT EXISTS idx_cards_favorited ON cards(is_favorited, card_name);
        "#,
    )?;
    Ok(())
}
