//! Repair of disagreements between the asset catalog and the asset
//! directory.
//!
//! A catalog entry whose file has vanished is an *orphaned record*; a file
//! with no catalog entry is an *unindexed file*. [`Reconciler::reconcile`]
//! removes the former, synthesizes entries for the latter and drops every
//! theme selection left pointing at nothing, all in one transaction.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use notebook_store::{AssetKind, AssetRecord, CatalogRepair, CatalogScan, StorageLocation, Theme};
use serde::Serialize;
use tracing::{info, warn};

use crate::asset_store::{AssetStore, ScanResult, ScannedAsset};
use crate::catalog_lock::WriterLock;
use crate::db::DbHandle;
use crate::error::ServerError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Orphaned records dropped from the catalog.
    pub removed: Vec<String>,
    /// Unreadable catalog rows dropped (forced runs only).
    pub corrupt_dropped: Vec<String>,
    /// Ids synthesized for unindexed files.
    pub added: Vec<String>,
    /// Settings keys cleared because they referenced a missing asset.
    pub cleared_selections: Vec<String>,
    /// Files left unindexed because their id is already taken.
    pub conflicts: Vec<String>,
    /// Catalog size after the repair.
    pub total: u64,
}

impl ReconcileReport {
    pub fn changed_anything(&self) -> bool {
        !(self.removed.is_empty()
            && self.corrupt_dropped.is_empty()
            && self.added.is_empty()
            && self.cleared_selections.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub is_consistent: bool,
    pub db_count: usize,
    pub fs_count: usize,
    /// Catalog entries without a backing file.
    pub orphaned_records: Vec<String>,
    /// Files without a catalog entry.
    pub missing_records: Vec<String>,
    /// Catalog rows that could not be decoded.
    pub corrupt_records: Vec<String>,
    /// Files whose id is already taken. Reconciling cannot index them, so
    /// they do not count against consistency.
    pub conflicts: Vec<String>,
}

/// The repair for one catalog/directory pair.
#[derive(Debug, Clone, Default)]
struct RepairPlan {
    orphaned: Vec<String>,
    corrupt: Vec<String>,
    unindexed: Vec<AssetRecord>,
    conflicts: Vec<String>,
}

impl RepairPlan {
    fn into_repair(self) -> CatalogRepair {
        let mut remove = self.corrupt;
        remove.extend(self.orphaned);
        CatalogRepair {
            remove,
            add: self.unindexed,
        }
    }
}

/// How the catalog and the directory disagree.
///
/// Unindexed files are judged against the records that survive orphan
/// removal, so a record whose file was swapped for a sibling extension is
/// dropped and re-indexed in the same run. Each id is claimed once: files
/// that share a stem with a kept record or with an earlier file (by name)
/// are reported as conflicts and left alone.
struct Divergence<'a> {
    orphaned: Vec<String>,
    unindexed: Vec<&'a ScannedAsset>,
    conflicts: Vec<String>,
}

fn diverge<'a>(catalog: &CatalogScan, scan: &'a ScanResult) -> Divergence<'a> {
    let on_disk: HashSet<&str> = scan.assets().iter().map(|a| a.file_name.as_str()).collect();
    let orphaned: Vec<String> = catalog
        .records
        .iter()
        .filter(|r| r.file_name().is_some_and(|name| !on_disk.contains(name)))
        .map(|r| r.id.clone())
        .collect();

    let orphaned_ids: HashSet<&str> = orphaned.iter().map(String::as_str).collect();
    let surviving: Vec<&AssetRecord> = catalog
        .records
        .iter()
        .filter(|r| !orphaned_ids.contains(r.id.as_str()))
        .collect();
    let surviving_files: HashSet<&str> = surviving.iter().filter_map(|r| r.file_name()).collect();
    let mut claimed: HashSet<&str> = surviving.iter().map(|r| r.id.as_str()).collect();

    let mut candidates: Vec<&ScannedAsset> = scan
        .assets()
        .iter()
        .filter(|a| !surviving_files.contains(a.file_name.as_str()))
        .filter(|a| AssetKind::from_extension(&a.extension).is_some())
        .collect();
    candidates.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    let mut unindexed = Vec::new();
    let mut conflicts = Vec::new();
    for asset in candidates {
        if claimed.insert(asset.id.as_str()) {
            unindexed.push(asset);
        } else {
            conflicts.push(asset.file_name.clone());
        }
    }

    Divergence {
        orphaned,
        unindexed,
        conflicts,
    }
}

/// Compute the repair without touching anything.
///
/// Inline records carry their own payload and are never orphaned. A
/// missing directory is only treated as empty when `force` is set, since
/// that drops every file-backed record. Corrupt rows likewise need `force`.
fn plan_repair(
    catalog: &CatalogScan,
    scan: &ScanResult,
    force: bool,
    now: DateTime<Utc>,
) -> Result<RepairPlan, ServerError> {
    if !catalog.corrupt_ids.is_empty() && !force {
        return Err(ServerError::CorruptCatalog(format!(
            "{} unreadable catalog row(s): {}; rerun with force to rebuild them from disk",
            catalog.corrupt_ids.len(),
            catalog.corrupt_ids.join(", ")
        )));
    }

    let has_file_records = catalog.records.iter().any(|r| r.file_name().is_some());
    if matches!(scan, ScanResult::Missing) && !force && has_file_records {
        return Err(ServerError::StoreMissing(
            "asset directory does not exist but the catalog references files; \
             rerun with force to drop those records"
                .to_string(),
        ));
    }

    let divergence = diverge(catalog, scan);
    Ok(RepairPlan {
        orphaned: divergence.orphaned,
        corrupt: catalog.corrupt_ids.clone(),
        unindexed: divergence
            .unindexed
            .into_iter()
            .filter_map(|a| synthesize_record(a, now))
            .collect(),
        conflicts: divergence.conflicts,
    })
}

/// Best-guess catalog entry for a file that was never uploaded through the
/// API. Kind comes from the extension and theme from the name, so both can
/// be wrong; the entry is flagged as never scanned.
fn synthesize_record(asset: &ScannedAsset, now: DateTime<Utc>) -> Option<AssetRecord> {
    let kind = AssetKind::from_extension(&asset.extension)?;
    Some(AssetRecord {
        id: asset.id.clone(),
        original_name: asset.file_name.clone(),
        storage: StorageLocation::File {
            file_name: asset.file_name.clone(),
        },
        thumbnail: asset.thumbnail.clone(),
        kind,
        size_bytes: asset.size_bytes,
        theme: Theme::infer_from_name(&asset.file_name),
        uploaded_at: now,
        security_scan_passed: false,
    })
}

#[derive(Clone)]
pub struct Reconciler {
    db: DbHandle,
    store: Arc<AssetStore>,
    lock: WriterLock,
}

impl Reconciler {
    pub fn new(db: DbHandle, store: Arc<AssetStore>, lock: WriterLock) -> Self {
        Self { db, store, lock }
    }

    /// Restore agreement between catalog and directory.
    ///
    /// Holds the catalog writer lock for the whole run, so it is mutually
    /// excluded with uploads and deletes.
    pub async fn reconcile(&self, force: bool) -> Result<ReconcileReport, ServerError> {
        let _guard = self.lock.acquire("reconcile").await?;

        let catalog = self.db.call(|db| db.scan_catalog()).await?;
        let scan = self.store.scan().await?;
        let plan = plan_repair(&catalog, &scan, force, Utc::now())?;

        if !plan.corrupt.is_empty() {
            warn!(ids = ?plan.corrupt, "Dropping unreadable catalog rows");
        }
        if !plan.conflicts.is_empty() {
            warn!(
                files = ?plan.conflicts,
                "Files share an id with another asset, leaving them unindexed"
            );
        }

        let mut report = ReconcileReport {
            removed: plan.orphaned.clone(),
            corrupt_dropped: plan.corrupt.clone(),
            added: plan.unindexed.iter().map(|r| r.id.clone()).collect(),
            conflicts: plan.conflicts.clone(),
            ..Default::default()
        };

        let repair = plan.into_repair();
        let (cleared, total) = self
            .db
            .call(move |db| {
                let cleared = db.apply_repair(&repair)?;
                Ok((cleared, db.count_assets()?))
            })
            .await?;
        report.cleared_selections = cleared;
        report.total = total;

        if report.changed_anything() {
            info!(
                removed = report.removed.len(),
                corrupt_dropped = report.corrupt_dropped.len(),
                added = report.added.len(),
                cleared = report.cleared_selections.len(),
                total = report.total,
                "Catalog reconciled"
            );
        } else {
            info!(total = report.total, "Catalog already consistent");
        }

        Ok(report)
    }

    /// Compare catalog and directory without writing anything.
    pub async fn validate(&self) -> Result<ConsistencyReport, ServerError> {
        let catalog = self.db.call(|db| db.scan_catalog()).await?;
        let scan = self.store.scan().await?;

        let divergence = diverge(&catalog, &scan);
        let mut orphaned_records = divergence.orphaned;
        let mut missing_records: Vec<String> =
            divergence.unindexed.iter().map(|a| a.id.clone()).collect();
        let mut conflicts = divergence.conflicts;
        let mut corrupt_records = catalog.corrupt_ids.clone();

        orphaned_records.sort();
        missing_records.sort();
        corrupt_records.sort();
        conflicts.sort();

        Ok(ConsistencyReport {
            is_consistent: orphaned_records.is_empty()
                && missing_records.is_empty()
                && corrupt_records.is_empty(),
            db_count: catalog.records.len() + catalog.corrupt_ids.len(),
            fs_count: scan.assets().len(),
            orphaned_records,
            missing_records,
            corrupt_records,
            conflicts,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    use notebook_store::Database;
    use tempfile::TempDir;

    use crate::asset_store::StorageMode;

    pub(crate) fn record(id: &str, ext: &str, theme: Theme) -> AssetRecord {
        AssetRecord {
            id: id.to_string(),
            original_name: format!("{id}.{ext}"),
            storage: StorageLocation::File {
                file_name: format!("{id}.{ext}"),
            },
            thumbnail: None,
            kind: AssetKind::from_extension(ext).unwrap(),
            size_bytes: 4,
            theme,
            uploaded_at: Utc::now(),
            security_scan_passed: true,
        }
    }

    struct Fixture {
        db: DbHandle,
        store: Arc<AssetStore>,
        reconciler: Reconciler,
        dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            AssetStore::new(dir.path().join("backgrounds"), StorageMode::Filesystem)
                .await
                .unwrap(),
        );
        let db = DbHandle::new(Database::open_in_memory().unwrap());
        let reconciler = Reconciler::new(
            db.clone(),
            store.clone(),
            WriterLock::new(Duration::from_secs(1)),
        );
        Fixture {
            db,
            store,
            reconciler,
            dir,
        }
    }

    async fn add_asset(f: &Fixture, record: AssetRecord) {
        if let Some(name) = record.file_name() {
            f.store.write(name, b"data").await.unwrap();
        }
        f.db.call(move |db| db.insert_asset(&record)).await.unwrap();
    }

    async fn catalog(f: &Fixture) -> Vec<AssetRecord> {
        f.db.call(|db| db.list_assets()).await.unwrap()
    }

    #[tokio::test]
    async fn test_orphan_removed_others_untouched() {
        let f = fixture().await;
        add_asset(&f, record("keep", "png", Theme::Light)).await;
        add_asset(&f, record("gone", "jpg", Theme::Dark)).await;
        f.store.remove("gone.jpg").await.unwrap();
        let before_keep = f.db.call(|db| db.get_asset("keep")).await.unwrap();

        let report = f.reconciler.reconcile(false).await.unwrap();
        assert_eq!(report.removed, vec!["gone".to_string()]);
        assert!(report.added.is_empty());
        assert_eq!(report.total, 1);
        assert_eq!(catalog(&f).await, vec![before_keep]);
    }

    #[tokio::test]
    async fn test_unindexed_file_gets_one_entry() {
        let f = fixture().await;
        f.store.write("night-dark.webm", b"\x1a\x45\xdf\xa3").await.unwrap();
        f.store.write("sky.png", b"png").await.unwrap();
        f.store.write("sky_thumb.png", b"thumb").await.unwrap();

        let report = f.reconciler.reconcile(false).await.unwrap();
        let mut added = report.added.clone();
        added.sort();
        assert_eq!(added, vec!["night-dark".to_string(), "sky".to_string()]);

        let night = f.db.call(|db| db.get_asset("night-dark")).await.unwrap();
        assert_eq!(night.kind, AssetKind::Video);
        assert_eq!(night.theme, Theme::Dark);
        assert_eq!(night.size_bytes, 4);
        assert!(!night.security_scan_passed);
        assert_eq!(night.thumbnail, None);

        let sky = f.db.call(|db| db.get_asset("sky")).await.unwrap();
        assert_eq!(sky.theme, Theme::Light);
        assert_eq!(sky.thumbnail.as_deref(), Some("sky_thumb.png"));
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let f = fixture().await;
        add_asset(&f, record("a", "png", Theme::Light)).await;
        add_asset(&f, record("b", "png", Theme::Dark)).await;
        f.store.remove("b.png").await.unwrap();
        f.store.write("c.gif", b"GIF89a").await.unwrap();
        f.db.call(|db| db.set_setting("current_background_dark", "b"))
            .await
            .unwrap();

        let first = f.reconciler.reconcile(false).await.unwrap();
        assert!(first.changed_anything());
        assert_eq!(first.cleared_selections, vec!["current_background_dark".to_string()]);
        let after_first = catalog(&f).await;

        let second = f.reconciler.reconcile(false).await.unwrap();
        assert!(!second.changed_anything());
        assert_eq!(second.total, 2);
        assert_eq!(catalog(&f).await, after_first);
    }

    #[tokio::test]
    async fn test_inline_records_are_never_orphaned() {
        let f = fixture().await;
        let mut inline = record("inl", "png", Theme::Light);
        inline.storage = StorageLocation::Inline {
            data_url: "data:image/png;base64,AAAA".to_string(),
        };
        f.db.call(move |db| db.insert_asset(&inline)).await.unwrap();

        let report = f.reconciler.reconcile(false).await.unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.total, 1);
        assert!(f.reconciler.validate().await.unwrap().is_consistent);
    }

    #[tokio::test]
    async fn test_missing_directory_needs_force() {
        let f = fixture().await;
        add_asset(&f, record("a", "png", Theme::Light)).await;
        std::fs::remove_dir_all(f.dir.path().join("backgrounds")).unwrap();

        assert!(matches!(
            f.reconciler.reconcile(false).await,
            Err(ServerError::StoreMissing(_))
        ));
        assert_eq!(catalog(&f).await.len(), 1);

        let report = f.reconciler.reconcile(true).await.unwrap();
        assert_eq!(report.removed, vec!["a".to_string()]);
        assert_eq!(report.total, 0);
    }

    #[tokio::test]
    async fn test_corrupt_rows_need_force() {
        let f = fixture().await;
        f.store.write("bad.png", b"data").await.unwrap();
        f.db.call(|db| {
            db.conn().execute(
                "INSERT INTO background_assets
                 (id, original_name, storage_kind, storage_value,
                  kind, size_bytes, theme, uploaded_at)
                 VALUES ('bad', 'bad.png', 'file', 'bad.png',
                         'hologram', 4, 'light', 'not a date')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        assert!(matches!(
            f.reconciler.reconcile(false).await,
            Err(ServerError::CorruptCatalog(_))
        ));

        let report = f.reconciler.reconcile(true).await.unwrap();
        assert_eq!(report.corrupt_dropped, vec!["bad".to_string()]);
        assert_eq!(report.added, vec!["bad".to_string()]);
        let rebuilt = f.db.call(|db| db.get_asset("bad")).await.unwrap();
        assert_eq!(rebuilt.kind, AssetKind::Image);
    }

    #[tokio::test]
    async fn test_validate_reports_without_mutating() {
        let f = fixture().await;
        add_asset(&f, record("a", "png", Theme::Light)).await;
        assert!(f.reconciler.validate().await.unwrap().is_consistent);

        f.store.remove("a.png").await.unwrap();
        f.store.write("z.mp4", b"\0\0\0\x20ftypisom").await.unwrap();

        let report = f.reconciler.validate().await.unwrap();
        assert!(!report.is_consistent);
        assert_eq!(report.db_count, 1);
        assert_eq!(report.fs_count, 1);
        assert_eq!(report.orphaned_records, vec!["a".to_string()]);
        assert_eq!(report.missing_records, vec!["z".to_string()]);

        assert_eq!(catalog(&f).await.len(), 1);
        assert!(!f.store.exists("a.png").await);
        assert!(f.store.exists("z.mp4").await);
        assert_eq!(f.reconciler.validate().await.unwrap(), report);
    }

    #[tokio::test]
    async fn test_shared_stem_indexes_one_file_and_reports_the_rest() {
        let f = fixture().await;
        f.store.write("sky.png", b"png").await.unwrap();
        f.store.write("sky.jpg", b"jpg").await.unwrap();

        let validated = f.reconciler.validate().await.unwrap();
        assert_eq!(validated.missing_records, vec!["sky".to_string()]);
        assert_eq!(validated.conflicts, vec!["sky.png".to_string()]);

        let first = f.reconciler.reconcile(false).await.unwrap();
        assert_eq!(first.added, vec!["sky".to_string()]);
        assert_eq!(first.conflicts, vec!["sky.png".to_string()]);
        let sky = f.db.call(|db| db.get_asset("sky")).await.unwrap();
        assert_eq!(sky.file_name(), Some("sky.jpg"));

        let second = f.reconciler.reconcile(true).await.unwrap();
        assert!(!second.changed_anything());
        assert_eq!(second.conflicts, vec!["sky.png".to_string()]);
        assert_eq!(second.total, 1);
        assert!(f.reconciler.validate().await.unwrap().is_consistent);
    }

    #[tokio::test]
    async fn test_file_sharing_id_with_kept_record_is_a_conflict() {
        let f = fixture().await;
        add_asset(&f, record("sky", "png", Theme::Light)).await;
        f.store.write("sky.webp", b"webp").await.unwrap();

        let report = f.reconciler.reconcile(false).await.unwrap();
        assert!(report.added.is_empty());
        assert!(report.removed.is_empty());
        assert_eq!(report.conflicts, vec!["sky.webp".to_string()]);
        assert_eq!(report.total, 1);
    }

    #[tokio::test]
    async fn test_swapped_extension_is_repaired_in_one_run() {
        let f = fixture().await;
        add_asset(&f, record("x", "png", Theme::Light)).await;
        f.db.call(|db| db.set_setting("current_background_light", "x"))
            .await
            .unwrap();
        f.store.remove("x.png").await.unwrap();
        f.store.write("x.jpg", b"jpg").await.unwrap();

        let validated = f.reconciler.validate().await.unwrap();
        assert_eq!(validated.orphaned_records, vec!["x".to_string()]);
        assert_eq!(validated.missing_records, vec!["x".to_string()]);

        let first = f.reconciler.reconcile(false).await.unwrap();
        assert_eq!(first.removed, vec!["x".to_string()]);
        assert_eq!(first.added, vec!["x".to_string()]);
        assert!(first.cleared_selections.is_empty());
        let x = f.db.call(|db| db.get_asset("x")).await.unwrap();
        assert_eq!(x.file_name(), Some("x.jpg"));

        let second = f.reconciler.reconcile(false).await.unwrap();
        assert!(!second.changed_anything());
        assert!(f.reconciler.validate().await.unwrap().is_consistent);
    }

    #[test]
    fn test_plan_on_missing_directory_without_file_records() {
        let plan =
            plan_repair(&CatalogScan::default(), &ScanResult::Missing, false, Utc::now()).unwrap();
        assert!(plan.into_repair().is_empty());
    }
}
