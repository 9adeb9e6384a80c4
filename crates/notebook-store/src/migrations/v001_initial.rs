//! v001 -- Initial schema creation.
//!
//! Creates the key/value `settings` table and the per-row
//! `background_assets` catalog.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Settings (key/value)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS settings (
    key        TEXT PRIMARY KEY NOT NULL,
    value      TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL                  -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Background assets (one row per catalog entry)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS background_assets (
    seq                  INTEGER PRIMARY KEY AUTOINCREMENT,  -- upload order
    id                   TEXT NOT NULL UNIQUE,
    original_name        TEXT NOT NULL,
    storage_kind         TEXT NOT NULL,       -- 'file' | 'inline'
    storage_value        TEXT NOT NULL,       -- file name or data URL
    thumbnail            TEXT,                -- thumbnail file name
    kind                 TEXT NOT NULL,       -- 'image' | 'video'
    size_bytes           INTEGER NOT NULL,
    theme                TEXT NOT NULL DEFAULT 'light',
    uploaded_at          TEXT NOT NULL,
    security_scan_passed INTEGER NOT NULL DEFAULT 0      -- boolean 0/1
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
