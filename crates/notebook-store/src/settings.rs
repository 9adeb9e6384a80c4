//! Key/value settings and per-theme background selections.
//!
//! A selection is the settings row `current_background_{theme}` holding an
//! asset id, or the empty string when nothing is selected. Older releases
//! wrote selections under other keys; those are still honoured by the
//! reference cleaner so stale ids never survive an asset deletion.
//!
//! Every other key is free-form user configuration. Those rows carry a
//! `value_type` tag so a JSON value comes back with the type it went in
//! with.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::assets;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::legacy::LEGACY_CATALOG_KEY;
use crate::models::{Setting, SettingType, Theme};

/// Legacy keys that are blanked (kept with an empty value) when stale.
const LEGACY_BLANKED_KEYS: [&str; 2] = ["background_light", "background_dark"];

/// Legacy keys that are deleted outright when stale.
const LEGACY_DELETED_KEYS: [&str; 2] = ["current_background", "user_background"];

/// Keys owned by background selection and the legacy catalog. They change
/// only through the selection and catalog operations.
pub fn is_reserved_setting(key: &str) -> bool {
    key == LEGACY_CATALOG_KEY
        || Theme::ALL.iter().any(|t| t.selection_key() == key)
        || LEGACY_BLANKED_KEYS.contains(&key)
        || LEGACY_DELETED_KEYS.contains(&key)
}

impl Database {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        get_setting_in(self.conn(), key)
    }

    /// Insert or overwrite a setting.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        set_setting_in(self.conn(), key, value)
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }

    /// The asset id currently selected for `theme`, if any.
    pub fn theme_selection(&self, theme: Theme) -> Result<Option<String>> {
        Ok(self
            .get_setting(theme.selection_key())?
            .filter(|value| !value.is_empty()))
    }

    /// Select `id` as the background for `theme`.
    ///
    /// The existence check and the write share a transaction so a
    /// concurrent delete cannot leave the selection dangling.
    pub fn select_background(&mut self, theme: Theme, id: &str) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        if !assets::asset_exists_in(&tx, id)? {
            return Err(StoreError::NotFound);
        }
        set_setting_in(&tx, theme.selection_key(), id)?;
        tx.commit()?;
        Ok(())
    }

    /// Clear the selection for `theme`. The key itself is kept.
    pub fn clear_selection(&self, theme: Theme) -> Result<bool> {
        blank_in(self.conn(), theme.selection_key())
    }

    /// Clear both theme selections and drop every legacy selection key.
    /// Returns the keys that changed.
    pub fn clear_all_selections(&mut self) -> Result<Vec<String>> {
        let tx = self.conn_mut().transaction()?;
        let changed = scrub_in(&tx, |_| true)?;
        tx.commit()?;
        Ok(changed)
    }

    /// Clear every selection whose id is not in `valid_ids`.
    ///
    /// Idempotent: a second call against the same set writes nothing.
    #[cfg(test)]
    pub fn clean_references(&mut self, valid_ids: &HashSet<String>) -> Result<Vec<String>> {
        let tx = self.conn_mut().transaction()?;
        let changed = clean_references_in(&tx, valid_ids)?;
        tx.commit()?;
        Ok(changed)
    }
}

impl Database {
    /// Every setting, decoded by its type tag, sorted by key.
    pub fn list_typed_settings(&self) -> Result<Vec<Setting>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT key, value, value_type FROM settings ORDER BY key")?;
        let rows = stmt.query_map([], row_to_setting)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn get_typed_setting(&self, key: &str) -> Result<Option<Setting>> {
        let setting = self
            .conn()
            .query_row(
                "SELECT key, value, value_type FROM settings WHERE key = ?1",
                params![key],
                row_to_setting,
            )
            .optional()?;
        Ok(setting)
    }

    /// Upsert every entry in one transaction, recording each value's type.
    pub fn put_typed_settings(&mut self, entries: &[(String, serde_json::Value)]) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        let now = Utc::now().to_rfc3339();
        for (key, value) in entries {
            let (value_type, raw) = encode_value(value);
            tx.execute(
                "INSERT INTO settings (key, value, value_type, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     value_type = excluded.value_type,
                     updated_at = excluded.updated_at",
                params![key, raw, value_type.as_str(), now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn encode_value(value: &serde_json::Value) -> (SettingType, String) {
    use serde_json::Value;
    match value {
        Value::Bool(b) => (SettingType::Boolean, b.to_string()),
        Value::Number(n) if n.is_f64() => (SettingType::Float, n.to_string()),
        Value::Number(n) => (SettingType::Integer, n.to_string()),
        Value::String(s) => (SettingType::String, s.clone()),
        Value::Null => (SettingType::String, String::new()),
        Value::Array(_) | Value::Object(_) => (SettingType::Json, value.to_string()),
    }
}

/// A value that does not parse as its tag says is returned as raw text.
fn decode_value(key: &str, value_type: SettingType, raw: String) -> serde_json::Value {
    match value_type {
        SettingType::String => serde_json::Value::String(raw),
        SettingType::Boolean => serde_json::Value::Bool(raw.eq_ignore_ascii_case("true")),
        SettingType::Integer | SettingType::Float | SettingType::Json => {
            match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(key, error = %e, "setting does not match its type tag");
                    serde_json::Value::String(raw)
                }
            }
        }
    }
}

fn row_to_setting(row: &rusqlite::Row<'_>) -> rusqlite::Result<Setting> {
    let key: String = row.get(0)?;
    let raw: String = row.get(1)?;
    let value_type = SettingType::parse(&row.get::<_, String>(2)?);
    let value = decode_value(&key, value_type, raw);
    Ok(Setting {
        key,
        value,
        value_type,
    })
}

pub(crate) fn get_setting_in(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub(crate) fn set_setting_in(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn blank_in(conn: &Connection, key: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE settings SET value = '', updated_at = ?2 WHERE key = ?1 AND value != ''",
        params![key, Utc::now().to_rfc3339()],
    )?;
    Ok(affected > 0)
}

pub(crate) fn clean_references_in(
    conn: &Connection,
    valid_ids: &HashSet<String>,
) -> Result<Vec<String>> {
    scrub_in(conn, |id| !valid_ids.contains(id))
}

pub(crate) fn clear_references_to_in(conn: &Connection, removed_id: &str) -> Result<Vec<String>> {
    scrub_in(conn, |id| id == removed_id)
}

/// Visit every selection key holding a non-empty value and reset the ones
/// `is_stale` flags. Returns the keys that changed.
fn scrub_in(conn: &Connection, is_stale: impl Fn(&str) -> bool) -> Result<Vec<String>> {
    let mut changed = Vec::new();

    let blanked = Theme::ALL
        .iter()
        .map(|t| t.selection_key())
        .chain(LEGACY_BLANKED_KEYS);
    for key in blanked {
        match get_setting_in(conn, key)? {
            Some(value) if !value.is_empty() && is_stale(&value) => {
                blank_in(conn, key)?;
                tracing::info!(key, stale_id = %value, "cleared background selection");
                changed.push(key.to_string());
            }
            _ => {}
        }
    }

    for key in LEGACY_DELETED_KEYS {
        match get_setting_in(conn, key)? {
            Some(value) if !value.is_empty() && is_stale(&value) => {
                conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
                tracing::info!(key, stale_id = %value, "removed legacy background selection");
                changed.push(key.to_string());
            }
            _ => {}
        }
    }

    Ok(changed)
}
