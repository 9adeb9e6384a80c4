use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use notebook_store::AssetKind;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::ServerError;

/// Stem suffix marking derived thumbnails (`{id}_thumb.{ext}`).
pub const THUMBNAIL_SUFFIX: &str = "_thumb";

/// Where uploaded bytes are kept, fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Files in the asset directory.
    Filesystem,
    /// No writable filesystem: payloads are embedded in the catalog as
    /// `data:` URLs.
    Inline,
}

/// A file found in the asset directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedAsset {
    /// File stem; matches the catalog id of the asset it backs.
    pub id: String,
    pub file_name: String,
    /// Lower-cased extension.
    pub extension: String,
    pub size_bytes: u64,
    /// `{id}_thumb.{ext}`, if present next to the file.
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    /// The directory does not exist. Kept distinct from an empty directory
    /// because treating it as empty would prune the whole catalog.
    Missing,
    Present(Vec<ScannedAsset>),
}

impl ScanResult {
    pub fn assets(&self) -> &[ScannedAsset] {
        match self {
            ScanResult::Missing => &[],
            ScanResult::Present(assets) => assets,
        }
    }
}

pub fn thumbnail_name(id: &str, extension: &str) -> String {
    format!("{id}{THUMBNAIL_SUFFIX}.{extension}")
}

/// Split `name` into stem and lower-cased extension.
pub fn split_extension(name: &str) -> Option<(&str, String)> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some((stem, ext.to_ascii_lowercase()))
}

/// Verify that a resolved path stays within the expected base directory.
/// Prevents path traversal attacks.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    // Canonicalize base; target may not exist yet so normalize manually
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .unwrap_or(target)
        .components()
    {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(ServerError::BadRequest(
                    "Path traversal detected".to_string(),
                ));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest(
            "Path traversal detected".to_string(),
        ));
    }
    Ok(resolved)
}

/// Reject names that could address anything outside the asset directory.
pub fn validate_file_name(file_name: &str) -> Result<(), ServerError> {
    if file_name.is_empty()
        || file_name.contains('/')
        || file_name.contains('\\')
        || file_name.contains("..")
        || file_name.contains('\0')
    {
        return Err(ServerError::BadRequest("Invalid file name".to_string()));
    }
    Ok(())
}

/// The asset directory: uploaded backgrounds plus their thumbnails.
#[derive(Debug, Clone)]
pub struct AssetStore {
    base_path: PathBuf,
    mode: StorageMode,
}

impl AssetStore {
    pub async fn new(base_path: PathBuf, mode: StorageMode) -> Result<Self, ServerError> {
        match mode {
            StorageMode::Filesystem => {
                fs::create_dir_all(&base_path).await.map_err(|e| {
                    ServerError::Storage(format!(
                        "Failed to create asset directory '{}': {}",
                        base_path.display(),
                        e
                    ))
                })?;
                info!(path = %base_path.display(), "Asset store initialized");
            }
            StorageMode::Inline => {
                info!("Asset store in inline mode, uploads are kept in the catalog");
            }
        }

        Ok(Self { base_path, mode })
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    #[cfg(test)]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub async fn write(&self, file_name: &str, data: &[u8]) -> Result<(), ServerError> {
        let path = self.safe_path(file_name)?;
        fs::write(&path, data).await.map_err(|e| {
            ServerError::Storage(format!("Failed to write {}: {}", file_name, e))
        })?;
        debug!(file = %file_name, size = data.len(), "Stored asset file");
        Ok(())
    }

    pub async fn read(&self, file_name: &str) -> Result<Vec<u8>, ServerError> {
        let path = self.safe_path(file_name)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(ServerError::NotFound(format!("File {file_name}"))),
        }
        fs::read(&path)
            .await
            .map_err(|e| ServerError::Storage(format!("Failed to read {}: {}", file_name, e)))
    }

    pub async fn exists(&self, file_name: &str) -> bool {
        match self.safe_path(file_name) {
            Ok(path) => fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Remove a file. `Ok(false)` if it was already gone.
    pub async fn remove(&self, file_name: &str) -> Result<bool, ServerError> {
        let path = self.safe_path(file_name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(file = %file_name, "Removed asset file");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ServerError::Storage(format!(
                "Failed to delete {}: {}",
                file_name, e
            ))),
        }
    }

    /// List every backing file: regular files with an allowed media
    /// extension, excluding thumbnails.
    pub async fn scan(&self) -> Result<ScanResult, ServerError> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %self.base_path.display(), "Asset directory does not exist");
                return Ok(ScanResult::Missing);
            }
            Err(e) => {
                return Err(ServerError::Storage(format!(
                    "Failed to list asset directory: {}",
                    e
                )))
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            ServerError::Storage(format!("Failed to read directory entry: {}", e))
        })? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match entry.metadata().await {
                Ok(meta) if meta.is_file() => files.push((name, meta.len())),
                _ => continue,
            }
        }

        let names: HashSet<&str> = files.iter().map(|(name, _)| name.as_str()).collect();
        let mut assets = Vec::new();
        for (name, size_bytes) in &files {
            let Some((stem, extension)) = split_extension(name) else {
                continue;
            };
            if AssetKind::from_extension(&extension).is_none() || stem.ends_with(THUMBNAIL_SUFFIX) {
                continue;
            }
            let thumbnail = thumbnail_name(stem, &extension);
            let thumbnail = names.contains(thumbnail.as_str()).then_some(thumbnail);

            assets.push(ScannedAsset {
                id: stem.to_string(),
                file_name: name.clone(),
                extension,
                size_bytes: *size_bytes,
                thumbnail,
            });
        }

        Ok(ScanResult::Present(assets))
    }

    /// Safe path that validates against traversal.
    fn safe_path(&self, file_name: &str) -> Result<PathBuf, ServerError> {
        validate_file_name(file_name)?;
        let raw = self.base_path.join(file_name);
        ensure_within(&self.base_path, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (AssetStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = AssetStore::new(dir.path().to_path_buf(), StorageMode::Filesystem)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_write_read_remove() {
        let (store, _dir) = test_store().await;
        store.write("abc.png", b"bytes").await.unwrap();
        assert_eq!(store.read("abc.png").await.unwrap(), b"bytes");
        assert!(store.exists("abc.png").await);

        assert!(store.remove("abc.png").await.unwrap());
        assert!(!store.remove("abc.png").await.unwrap());
        assert!(matches!(
            store.read("abc.png").await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (store, _dir) = test_store().await;
        assert!(store.read("../etc/passwd").await.is_err());
        assert!(store.write("a/b.png", b"x").await.is_err());
        assert!(store.read("..\\x.png").await.is_err());
    }

    #[tokio::test]
    async fn test_scan_skips_thumbnails_and_unknown_extensions() {
        let (store, dir) = test_store().await;
        store.write("one.png", b"1234").await.unwrap();
        store.write("one_thumb.png", b"12").await.unwrap();
        store.write("two.MP4", b"123456").await.unwrap();
        store.write("notes.txt", b"x").await.unwrap();
        store.write("noext", b"x").await.unwrap();
        std::fs::create_dir(dir.path().join("sub.png")).unwrap();

        let ScanResult::Present(mut assets) = store.scan().await.unwrap() else {
            panic!("directory should exist");
        };
        assets.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].id, "one");
        assert_eq!(assets[0].size_bytes, 4);
        assert_eq!(assets[0].thumbnail.as_deref(), Some("one_thumb.png"));
        assert_eq!(assets[1].thumbnail, None);
        assert_eq!(assets[1].id, "two");
        assert_eq!(assets[1].extension, "mp4");
    }

    #[tokio::test]
    async fn test_scan_missing_directory() {
        let (store, dir) = test_store().await;
        std::fs::remove_dir_all(dir.path()).unwrap();
        assert_eq!(store.scan().await.unwrap(), ScanResult::Missing);
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("a.b.PNG"), Some(("a.b", "png".to_string())));
        assert_eq!(split_extension(".png"), None);
        assert_eq!(split_extension("png"), None);
    }
}
