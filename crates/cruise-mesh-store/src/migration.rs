//! SQLite schema versions.
//!
//! `MIGRATIONS[i]` upgrades a database from version `i` to `i + 1`. The
//! applied version is recorded in `schema_version` so reopening a database
//! only runs the steps it is missing.

use rusqlite::{params, Connection, OptionalExtension};

use cruise_mesh_core::now_millis;

use crate::error::{Result, StoreError};

const MIGRATIONS: &[&str] = &[
    // v1: messages are insert-only, the primary key is the dedup boundary.
    r#"
    CREATE TABLE messages (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        sender_id TEXT NOT NULL,
        topic_id TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL
    );

    CREATE TABLE settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE INDEX idx_messages_topic_created ON messages(topic_id, created_at);
    "#,
];

/// Schema version this build writes.
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema up to [`SCHEMA_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL,
            upgraded_at INTEGER NOT NULL
        )",
    )?;

    let found: u32 = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    if found > SCHEMA_VERSION {
        return Err(StoreError::Migration(format!(
            "database is at schema v{found}, this build only knows v{SCHEMA_VERSION}"
        )));
    }
    if found == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (step, sql) in MIGRATIONS.iter().enumerate().skip(found as usize) {
        let version = step as u32 + 1;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_version (version, upgraded_at) VALUES (?1, ?2)",
            params![version, now_millis()],
        )?;
        tracing::debug!(version, "upgraded message store schema");
    }
    tx.commit()?;

    Ok(())
}
