//! One-time import of the legacy `background_files` settings blob.
//!
//! Older deployments kept the whole catalog as a JSON array in a single
//! settings row. On startup that array is moved into `background_assets`
//! and the row is deleted. A blob that does not parse is reported as
//! [`StoreError::CorruptCatalog`]; nothing is imported and the row stays
//! in place until an operator explicitly discards it.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::assets;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{AssetKind, AssetRecord, StorageLocation, Theme};

pub const LEGACY_CATALOG_KEY: &str = "background_files";

/// Outcome of [`Database::import_legacy_catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyImport {
    NotPresent,
    Imported { imported: usize, already_present: usize },
}

/// Entry shape written by older releases. Only `id` was always present.
#[derive(Debug, Deserialize)]
struct LegacyEntry {
    id: String,
    original_name: Option<String>,
    file_path: Option<String>,
    file_url: Option<String>,
    thumbnail_url: Option<String>,
    file_type: Option<String>,
    file_size: Option<u64>,
    theme: Option<String>,
    upload_time: Option<String>,
    security_scan_passed: Option<bool>,
}

impl Database {
    pub fn import_legacy_catalog(&mut self) -> Result<LegacyImport> {
        let Some(blob) = self.get_setting(LEGACY_CATALOG_KEY)? else {
            return Ok(LegacyImport::NotPresent);
        };

        let records = parse_legacy_catalog(&blob)?;

        let tx = self.conn_mut().transaction()?;
        let mut imported = 0;
        for record in &records {
            if assets::insert_asset_if_absent_in(&tx, record)? {
                imported += 1;
            }
        }
        tx.execute(
            "DELETE FROM settings WHERE key = ?1",
            rusqlite::params![LEGACY_CATALOG_KEY],
        )?;
        tx.commit()?;

        tracing::info!(imported, total = records.len(), "imported legacy background catalog");
        Ok(LegacyImport::Imported {
            imported,
            already_present: records.len() - imported,
        })
    }

    /// Drop the legacy blob without importing it.
    pub fn discard_legacy_catalog(&self) -> Result<bool> {
        let removed = self.delete_setting(LEGACY_CATALOG_KEY)?;
        if removed {
            tracing::warn!("discarded legacy background catalog");
        }
        Ok(removed)
    }

    /// Whether a legacy blob is still waiting to be imported.
    #[cfg(test)]
    pub fn has_legacy_catalog(&self) -> Result<bool> {
        Ok(self.get_setting(LEGACY_CATALOG_KEY)?.is_some())
    }
}

fn parse_legacy_catalog(blob: &str) -> Result<Vec<AssetRecord>> {
    if blob.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<LegacyEntry> = serde_json::from_str(blob)
        .map_err(|e| StoreError::CorruptCatalog(format!("legacy background_files: {e}")))?;
    entries.into_iter().map(LegacyEntry::into_record).collect()
}

/// Last path segment of a URL or filesystem path.
fn last_segment(s: &str) -> &str {
    s.rsplit(['/', '\\']).next().unwrap_or(s)
}

impl LegacyEntry {
    fn into_record(self) -> Result<AssetRecord> {
        let storage = match (self.file_url.as_deref(), self.file_path.as_deref()) {
            (Some(url), _) if url.starts_with("data:") => StorageLocation::Inline {
                data_url: url.to_string(),
            },
            (Some(url), _) if !url.is_empty() => StorageLocation::File {
                file_name: last_segment(url).to_string(),
            },
            (_, Some(path)) if !path.is_empty() => StorageLocation::File {
                file_name: last_segment(path).to_string(),
            },
            _ => {
                return Err(StoreError::CorruptCatalog(format!(
                    "legacy entry {} has no storage location",
                    self.id
                )))
            }
        };

        let kind = self
            .file_type
            .as_deref()
            .and_then(AssetKind::parse)
            .or_else(|| match &storage {
                StorageLocation::File { file_name } => file_name
                    .rsplit_once('.')
                    .and_then(|(_, ext)| AssetKind::from_extension(ext)),
                StorageLocation::Inline { .. } => None,
            })
            .ok_or_else(|| {
                StoreError::CorruptCatalog(format!("legacy entry {} has no media kind", self.id))
            })?;

        let uploaded_at = self
            .upload_time
            .as_deref()
            .and_then(parse_legacy_time)
            .unwrap_or_else(Utc::now);

        Ok(AssetRecord {
            original_name: self.original_name.unwrap_or_else(|| self.id.clone()),
            thumbnail: self
                .thumbnail_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .map(|url| last_segment(url).to_string()),
            size_bytes: self.file_size.unwrap_or(0),
            theme: self.theme.as_deref().and_then(Theme::parse).unwrap_or_default(),
            security_scan_passed: self.security_scan_passed.unwrap_or(false),
            id: self.id,
            storage,
            kind,
            uploaded_at,
        })
    }
}

/// Legacy timestamps are naive local ISO strings; they are read as UTC.
fn parse_legacy_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    s.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOB: &str = r#"[
        {"id": "f1", "original_name": "beach.png", "file_path": "uploads/backgrounds/f1.png",
         "file_url": "/api/backgrounds/file/f1.png",
         "thumbnail_url": "/api/backgrounds/file/f1_thumb.png",
         "file_type": "image", "file_size": 1234, "theme": "dark",
         "upload_time": "2024-05-01T10:20:30.123456", "security_scan_passed": true},
        {"id": "v1", "original_name": "clip.mp4", "file_url": "data:video/mp4;base64,AAAA",
         "file_type": "video", "file_size": 3, "storage_type": "base64"}
    ]"#;

    #[test]
    fn imports_and_removes_blob() {
        let mut db = Database::open_in_memory().unwrap();
        db.set_setting(LEGACY_CATALOG_KEY, BLOB).unwrap();

        let outcome = db.import_legacy_catalog().unwrap();
        assert_eq!(
            outcome,
            LegacyImport::Imported {
                imported: 2,
                already_present: 0
            }
        );
        assert!(!db.has_legacy_catalog().unwrap());

        let f1 = db.get_asset("f1").unwrap();
        assert_eq!(f1.file_name(), Some("f1.png"));
        assert_eq!(f1.thumbnail.as_deref(), Some("f1_thumb.png"));
        assert_eq!(f1.theme, Theme::Dark);
        assert_eq!(f1.size_bytes, 1234);

        let v1 = db.get_asset("v1").unwrap();
        assert!(matches!(v1.storage, StorageLocation::Inline { .. }));
        assert_eq!(v1.theme, Theme::Light);

        assert_eq!(db.import_legacy_catalog().unwrap(), LegacyImport::NotPresent);
    }

    #[test]
    fn corrupt_blob_fails_loudly_and_is_kept() {
        let mut db = Database::open_in_memory().unwrap();
        db.set_setting(LEGACY_CATALOG_KEY, "[{\"id\": \"x\",").unwrap();

        assert!(matches!(
            db.import_legacy_catalog(),
            Err(StoreError::CorruptCatalog(_))
        ));
        assert!(db.has_legacy_catalog().unwrap());
        assert_eq!(db.count_assets().unwrap(), 0);

        assert!(db.discard_legacy_catalog().unwrap());
        assert!(!db.has_legacy_catalog().unwrap());
    }

    #[test]
    fn naive_timestamps_parse() {
        assert!(parse_legacy_time("2024-05-01T10:20:30").is_some());
        assert!(parse_legacy_time("2024-05-01T10:20:30.5").is_some());
        assert!(parse_legacy_time("yesterday").is_none());
    }
}
