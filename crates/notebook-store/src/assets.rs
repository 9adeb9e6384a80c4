//! The background catalog: one `background_assets` row per [`AssetRecord`].
//!
//! Single-record mutations are one statement each. Multi-step changes
//! (removing an asset together with the selections that point at it, or
//! applying a reconciliation repair) run inside one transaction so a failure
//! leaves the catalog untouched.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{AssetKind, AssetRecord, StorageLocation, Theme};
use crate::settings;

const ASSET_COLUMNS: &str = "id, original_name, storage_kind, storage_value, thumbnail, kind, \
                             size_bytes, theme, uploaded_at, security_scan_passed";

/// Every catalog row, split into the rows that decode and the ids of those
/// that do not.
#[derive(Debug, Clone, Default)]
pub struct CatalogScan {
    pub records: Vec<AssetRecord>,
    pub corrupt_ids: Vec<String>,
}

/// Changes to apply to the catalog in one transaction.
#[derive(Debug, Clone, Default)]
pub struct CatalogRepair {
    pub remove: Vec<String>,
    pub add: Vec<AssetRecord>,
}

impl CatalogRepair {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

impl Database {
    pub fn insert_asset(&self, record: &AssetRecord) -> Result<()> {
        insert_asset_in(self.conn(), record)
    }

    pub fn get_asset(&self, id: &str) -> Result<AssetRecord> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {ASSET_COLUMNS} FROM background_assets WHERE id = ?1"),
                params![id],
                read_asset_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        row.decode()
    }

    pub fn asset_exists(&self, id: &str) -> Result<bool> {
        asset_exists_in(self.conn(), id)
    }

    /// All catalog entries in upload order. Fails with
    /// [`StoreError::CorruptCatalog`] if any row cannot be decoded.
    pub fn list_assets(&self) -> Result<Vec<AssetRecord>> {
        let scan = self.scan_catalog()?;
        if let Some(first) = scan.corrupt_ids.first() {
            return Err(StoreError::CorruptCatalog(format!(
                "{} unreadable catalog row(s), first: {first}",
                scan.corrupt_ids.len()
            )));
        }
        Ok(scan.records)
    }

    /// Like [`Database::list_assets`] but reports undecodable rows
    /// instead of failing on them.
    pub fn scan_catalog(&self) -> Result<CatalogScan> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ASSET_COLUMNS} FROM background_assets ORDER BY seq ASC"
        ))?;
        let rows = stmt.query_map([], read_asset_row)?;

        let mut scan = CatalogScan::default();
        for row in rows {
            let row = row?;
            let id = row.id.clone();
            match row.decode() {
                Ok(record) => scan.records.push(record),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "unreadable catalog row");
                    scan.corrupt_ids.push(id);
                }
            }
        }
        Ok(scan)
    }

    pub fn count_assets(&self) -> Result<u64> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM background_assets", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Remove one asset and clear every selection that references it.
    ///
    /// Returns the settings keys that were cleared. Fails with
    /// [`StoreError::NotFound`] (and changes nothing) if the id is unknown.
    pub fn remove_asset(&mut self, id: &str) -> Result<Vec<String>> {
        let tx = self.conn_mut().transaction()?;

        let affected = tx.execute("DELETE FROM background_assets WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        let cleared = settings::clear_references_to_in(&tx, id)?;

        tx.commit()?;
        Ok(cleared)
    }

    /// Apply a reconciliation repair and then drop every selection that no
    /// longer points at a catalog entry, all in one transaction.
    ///
    /// Returns the settings keys that were cleared.
    pub fn apply_repair(&mut self, repair: &CatalogRepair) -> Result<Vec<String>> {
        let tx = self.conn_mut().transaction()?;

        for id in &repair.remove {
            tx.execute("DELETE FROM background_assets WHERE id = ?1", params![id])?;
        }
        for record in &repair.add {
            insert_asset_in(&tx, record)?;
        }

        let valid = asset_ids_in(&tx)?;
        let cleared = settings::clean_references_in(&tx, &valid)?;

        tx.commit()?;
        Ok(cleared)
    }
}

pub(crate) fn insert_asset_in(conn: &Connection, record: &AssetRecord) -> Result<()> {
    insert_with(conn, "INSERT", record)?;
    Ok(())
}

/// Insert unless the id is already catalogued. Returns whether a row was
/// written.
pub(crate) fn insert_asset_if_absent_in(conn: &Connection, record: &AssetRecord) -> Result<bool> {
    Ok(insert_with(conn, "INSERT OR IGNORE", record)? > 0)
}

fn insert_with(conn: &Connection, verb: &str, record: &AssetRecord) -> Result<usize> {
    let affected = conn.execute(
        &format!(
            "{verb} INTO background_assets ({ASSET_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            record.id,
            record.original_name,
            record.storage.kind_str(),
            record.storage.value(),
            record.thumbnail,
            record.kind.as_str(),
            record.size_bytes as i64,
            record.theme.as_str(),
            record.uploaded_at.to_rfc3339(),
            record.security_scan_passed as i32,
        ],
    )?;
    Ok(affected)
}

pub(crate) fn asset_exists_in(conn: &Connection, id: &str) -> Result<bool> {
    let found: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM background_assets WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    Ok(found != 0)
}

fn asset_ids_in(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT id FROM background_assets")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(ids)
}

/// Raw column values; decoding happens outside the rusqlite row closure so
/// bad values surface as [`StoreError::CorruptCatalog`].
struct AssetRow {
    id: String,
    original_name: String,
    storage_kind: String,
    storage_value: String,
    thumbnail: Option<String>,
    kind: String,
    size_bytes: i64,
    theme: String,
    uploaded_at: String,
    security_scan_passed: i64,
}

fn read_asset_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssetRow> {
    Ok(AssetRow {
        id: row.get(0)?,
        original_name: row.get(1)?,
        storage_kind: row.get(2)?,
        storage_value: row.get(3)?,
        thumbnail: row.get(4)?,
        kind: row.get(5)?,
        size_bytes: row.get(6)?,
        theme: row.get(7)?,
        uploaded_at: row.get(8)?,
        security_scan_passed: row.get(9)?,
    })
}

impl AssetRow {
    fn decode(self) -> Result<AssetRecord> {
        let corrupt = |what: &str, value: &str| {
            StoreError::CorruptCatalog(format!("asset {}: invalid {what} {value:?}", self.id))
        };

        let storage = match self.storage_kind.as_str() {
            "file" => StorageLocation::File {
                file_name: self.storage_value.clone(),
            },
            "inline" => StorageLocation::Inline {
                data_url: self.storage_value.clone(),
            },
            other => return Err(corrupt("storage kind", other)),
        };
        let kind = AssetKind::parse(&self.kind).ok_or_else(|| corrupt("kind", &self.kind))?;
        let theme = Theme::parse(&self.theme).ok_or_else(|| corrupt("theme", &self.theme))?;
        let uploaded_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&self.uploaded_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| corrupt("timestamp", &self.uploaded_at))?;
        let size_bytes = u64::try_from(self.size_bytes)
            .map_err(|_| corrupt("size", &self.size_bytes.to_string()))?;

        Ok(AssetRecord {
            id: self.id,
            original_name: self.original_name,
            storage,
            thumbnail: self.thumbnail,
            kind,
            size_bytes,
            theme,
            uploaded_at,
            security_scan_passed: self.security_scan_passed != 0,
        })
    }
}
