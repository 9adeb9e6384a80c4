//! Upload and delete of background assets.
//!
//! Both run under the catalog writer lock: the file write (or removal) and
//! the catalog change happen as one step from the point of view of every
//! other writer.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use notebook_store::{AssetKind, AssetRecord, StorageLocation, Theme};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::asset_store::{thumbnail_name, AssetStore, StorageMode};
use crate::catalog_lock::WriterLock;
use crate::content_check::{self, mime_for_extension};
use crate::db::DbHandle;
use crate::error::ServerError;
use crate::thumbnail;

/// An upload as received from the client.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub data: Bytes,
    /// Raw `theme` form field; `None` means light.
    pub theme: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteStatus {
    FullyDeleted,
    DeletedButPhysicalCleanupFailed,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub status: DeleteStatus,
    pub cleared_selections: Vec<String>,
}

#[derive(Clone)]
pub struct AssetLibrary {
    db: DbHandle,
    store: Arc<AssetStore>,
    lock: WriterLock,
    max_upload_size: usize,
}

impl AssetLibrary {
    pub fn new(
        db: DbHandle,
        store: Arc<AssetStore>,
        lock: WriterLock,
        max_upload_size: usize,
    ) -> Self {
        Self {
            db,
            store,
            lock,
            max_upload_size,
        }
    }

    pub fn max_upload_size(&self) -> usize {
        self.max_upload_size
    }

    pub async fn list(&self) -> Result<Vec<AssetRecord>, ServerError> {
        self.db.call(|db| db.list_assets()).await
    }

    /// Validate, store and catalog one upload.
    ///
    /// Nothing is written unless every check passes. If the catalog insert
    /// fails the files written for this upload are removed again.
    pub async fn upload(&self, req: UploadRequest) -> Result<AssetRecord, ServerError> {
        let checked = content_check::check_upload(&req.file_name, &req.data, self.max_upload_size)?;
        let theme = match req.theme.as_deref().map(str::trim) {
            None | Some("") => Theme::default(),
            Some(raw) => Theme::parse(raw)
                .ok_or_else(|| ServerError::BadRequest(format!("Invalid theme '{raw}'")))?,
        };

        let _guard = self.lock.acquire("upload").await?;

        let id = Uuid::new_v4().to_string();
        let mut written: Vec<String> = Vec::new();

        let (storage, thumbnail) = match self.store.mode() {
            StorageMode::Filesystem => {
                let file_name = format!("{id}.{}", checked.extension);
                self.store.write(&file_name, &req.data).await?;
                written.push(file_name.clone());

                let thumbnail = match checked.kind {
                    AssetKind::Image => {
                        self.write_thumbnail(&id, &checked.extension, req.data.clone())
                            .await
                    }
                    AssetKind::Video => None,
                };
                if let Some(name) = &thumbnail {
                    written.push(name.clone());
                }

                (StorageLocation::File { file_name }, thumbnail)
            }
            StorageMode::Inline => {
                let data_url = format!(
                    "data:{};base64,{}",
                    mime_for_extension(&checked.extension),
                    STANDARD.encode(&req.data)
                );
                (StorageLocation::Inline { data_url }, None)
            }
        };

        let record = AssetRecord {
            id: id.clone(),
            original_name: checked.original_name,
            storage,
            thumbnail,
            kind: checked.kind,
            size_bytes: req.data.len() as u64,
            theme,
            uploaded_at: chrono::Utc::now(),
            security_scan_passed: true,
        };

        let to_insert = record.clone();
        if let Err(e) = self.db.call(move |db| db.insert_asset(&to_insert)).await {
            for name in &written {
                if let Err(cleanup) = self.store.remove(name).await {
                    warn!(
                        file = %name,
                        error = %cleanup,
                        "Failed to remove file after catalog insert failed"
                    );
                }
            }
            return Err(e);
        }

        info!(
            id = %record.id,
            name = %record.original_name,
            kind = record.kind.as_str(),
            size = record.size_bytes,
            theme = record.theme.as_str(),
            "Background uploaded"
        );
        Ok(record)
    }

    /// Thumbnails are best effort: a failure is logged and the upload
    /// proceeds without one.
    async fn write_thumbnail(&self, id: &str, extension: &str, data: Bytes) -> Option<String> {
        let ext = extension.to_string();
        let rendered =
            tokio::task::spawn_blocking(move || thumbnail::render_thumbnail(&data, &ext)).await;

        let bytes = match rendered {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!(id = %id, error = %e, "Thumbnail generation failed");
                return None;
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Thumbnail task failed");
                return None;
            }
        };

        let name = thumbnail_name(id, extension);
        match self.store.write(&name, &bytes).await {
            Ok(()) => {
                debug!(id = %id, file = %name, "Thumbnail written");
                Some(name)
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to store thumbnail");
                None
            }
        }
    }

    /// Remove an asset's files and its catalog entry, clearing every
    /// selection that referenced it.
    ///
    /// File removal is best effort. If it fails the catalog entry is still
    /// removed and the outcome says so; the leftover file is picked up as
    /// unindexed by the next reconcile.
    pub async fn delete(&self, id: &str) -> Result<DeleteOutcome, ServerError> {
        let _guard = self.lock.acquire("delete").await?;

        let lookup_id = id.to_string();
        let record = match self.db.call(move |db| db.get_asset(&lookup_id)).await {
            Ok(record) => record,
            Err(ServerError::NotFound(_)) => {
                return Ok(DeleteOutcome {
                    status: DeleteStatus::NotFound,
                    cleared_selections: Vec::new(),
                })
            }
            Err(e) => return Err(e),
        };

        let mut cleanup_failed = false;
        let files = record
            .file_name()
            .map(str::to_string)
            .into_iter()
            .chain(record.thumbnail.clone());
        for name in files {
            if let Err(e) = self.store.remove(&name).await {
                warn!(id = %record.id, file = %name, error = %e, "Failed to remove asset file");
                cleanup_failed = true;
            }
        }

        let remove_id = record.id.clone();
        let cleared_selections = match self.db.call(move |db| db.remove_asset(&remove_id)).await {
            Ok(cleared) => cleared,
            // Removed out of band since the lookup; gone either way.
            Err(ServerError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let status = if cleanup_failed {
            DeleteStatus::DeletedButPhysicalCleanupFailed
        } else {
            DeleteStatus::FullyDeleted
        };
        info!(id = %record.id, ?status, cleared = cleared_selections.len(), "Background deleted");

        Ok(DeleteOutcome {
            status,
            cleared_selections,
        })
    }

    /// Select `id` as the background for `theme`, or clear the selection
    /// when `id` is `None`.
    pub async fn select(&self, theme: Theme, id: Option<String>) -> Result<(), ServerError> {
        match id.filter(|id| !id.is_empty()) {
            Some(id) => {
                let result = self.db.call(move |db| db.select_background(theme, &id)).await;
                match result {
                    Err(ServerError::NotFound(_)) => {
                        Err(ServerError::NotFound("Background not found".to_string()))
                    }
                    other => other,
                }
            }
            None => {
                self.db
                    .call(move |db| db.set_setting(theme.selection_key(), ""))
                    .await
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use notebook_store::Database;
    use tempfile::TempDir;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 120, 40]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    async fn library(mode: StorageMode) -> (AssetLibrary, Arc<AssetStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AssetStore::new(dir.path().join("bg"), mode).await.unwrap());
        let db = DbHandle::new(Database::open_in_memory().unwrap());
        let lib = AssetLibrary::new(
            db,
            store.clone(),
            WriterLock::new(Duration::from_secs(5)),
            1024 * 1024,
        );
        (lib, store, dir)
    }

    fn upload(name: &str, data: Vec<u8>, theme: Option<&str>) -> UploadRequest {
        UploadRequest {
            file_name: name.to_string(),
            data: Bytes::from(data),
            theme: theme.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_upload_writes_file_thumbnail_and_record() {
        let (lib, store, _dir) = library(StorageMode::Filesystem).await;
        let data = png_bytes(600, 400);
        let record = lib.upload(upload("sunset.png", data.clone(), Some("dark"))).await.unwrap();

        assert_eq!(record.kind, AssetKind::Image);
        assert_eq!(record.theme, Theme::Dark);
        assert_eq!(record.size_bytes, data.len() as u64);
        assert!(record.security_scan_passed);
        let file_name = record.file_name().unwrap().to_string();
        assert_eq!(file_name, format!("{}.png", record.id));
        assert_eq!(store.read(&file_name).await.unwrap(), data);

        let thumb = record.thumbnail.clone().unwrap();
        let decoded = image::load_from_memory(&store.read(&thumb).await.unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (300, 200));

        assert_eq!(lib.list().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_rejected_upload_leaves_no_trace() {
        let (lib, store, _dir) = library(StorageMode::Filesystem).await;

        let err = lib.upload(upload("tool.exe", b"MZ\x90\0\x03".to_vec(), None)).await.unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
        let err = lib.upload(upload("fake.png", b"MZ\x90\0\x03".to_vec(), None)).await.unwrap_err();
        assert!(matches!(err, ServerError::Rejected(_)));
        let err = lib
            .upload(upload("ok.png", png_bytes(4, 4), Some("sepia")))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));

        assert!(lib.list().await.unwrap().is_empty());
        assert!(store.scan().await.unwrap().assets().is_empty());
    }

    #[tokio::test]
    async fn test_inline_upload_embeds_payload() {
        let (lib, store, _dir) = library(StorageMode::Inline).await;
        let record = lib.upload(upload("tiny.png", png_bytes(2, 2), None)).await.unwrap();

        match &record.storage {
            StorageLocation::Inline { data_url } => {
                assert!(data_url.starts_with("data:image/png;base64,"))
            }
            other => panic!("expected inline storage, got {other:?}"),
        }
        assert_eq!(record.thumbnail, None);
        assert!(!store.base_path().exists());
    }

    #[tokio::test]
    async fn test_concurrent_uploads_are_both_kept() {
        let (lib, _store, _dir) = library(StorageMode::Filesystem).await;
        let a = lib.clone();
        let b = lib.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.upload(upload("a.png", png_bytes(8, 8), None)).await }),
            tokio::spawn(async move {
                b.upload(upload("b.png", png_bytes(8, 8), Some("dark"))).await
            }),
        );
        let ra = ra.unwrap().unwrap();
        let rb = rb.unwrap().unwrap();

        let mut ids: Vec<String> = lib.list().await.unwrap().into_iter().map(|r| r.id).collect();
        ids.sort();
        let mut expected = vec![ra.id, rb.id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_delete_clears_selection_and_files() {
        let (lib, store, _dir) = library(StorageMode::Filesystem).await;
        let record = lib.upload(upload("x.png", png_bytes(20, 20), Some("dark"))).await.unwrap();
        lib.select(Theme::Dark, Some(record.id.clone())).await.unwrap();

        let outcome = lib.delete(&record.id).await.unwrap();
        assert_eq!(outcome.status, DeleteStatus::FullyDeleted);
        assert_eq!(outcome.cleared_selections, vec!["current_background_dark".to_string()]);
        assert!(!store.exists(record.file_name().unwrap()).await);
        assert!(!store.exists(record.thumbnail.as_deref().unwrap()).await);
        assert!(lib.list().await.unwrap().is_empty());

        let again = lib.delete(&record.id).await.unwrap();
        assert_eq!(again.status, DeleteStatus::NotFound);
    }

    #[tokio::test]
    async fn test_delete_with_file_already_gone_is_full() {
        let (lib, store, _dir) = library(StorageMode::Filesystem).await;
        let record = lib.upload(upload("y.png", png_bytes(4, 4), None)).await.unwrap();
        store.remove(record.file_name().unwrap()).await.unwrap();

        let outcome = lib.delete(&record.id).await.unwrap();
        assert_eq!(outcome.status, DeleteStatus::FullyDeleted);
    }

    #[tokio::test]
    async fn test_select_unknown_id_is_not_found() {
        let (lib, _store, _dir) = library(StorageMode::Filesystem).await;
        assert!(matches!(
            lib.select(Theme::Light, Some("nope".to_string())).await,
            Err(ServerError::NotFound(_))
        ));
        lib.select(Theme::Light, None).await.unwrap();
    }

    #[test]
    fn test_delete_status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(DeleteStatus::DeletedButPhysicalCleanupFailed).unwrap(),
            serde_json::json!("deleted-but-physical-cleanup-failed")
        );
        assert_eq!(
            serde_json::to_value(DeleteStatus::FullyDeleted).unwrap(),
            serde_json::json!("fully-deleted")
        );
    }
}
