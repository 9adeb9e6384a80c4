//! # notebook-server
//!
//! HTTP backend for the notebook app.
//!
//! This binary provides:
//! - **Background library**: upload (content checked, with thumbnails),
//!   listing, serving and deletion of background images and videos
//! - **Catalog reconciliation** between the asset directory and the
//!   SQLite catalog, on demand and at startup
//! - **Per-theme background selection** that never points at a deleted asset
//! - **Notes and todos** CRUD

mod api;
mod asset_store;
mod catalog_lock;
mod config;
mod content_check;
mod db;
mod error;
mod library;
mod reconcile;
mod thumbnail;

use std::sync::Arc;

use anyhow::Context;
use notebook_store::{Database, LegacyImport, StoreError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::asset_store::AssetStore;
use crate::catalog_lock::WriterLock;
use crate::config::ServerConfig;
use crate::db::DbHandle;
use crate::library::AssetLibrary;
use crate::reconcile::Reconciler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,notebook_server=debug")),
        )
        .init();

    info!("Starting notebook server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database and migrate the legacy catalog
    // -----------------------------------------------------------------------
    let mut database = Database::open_at(&config.database_path).with_context(|| {
        format!("failed to open database at {}", config.database_path.display())
    })?;
    let legacy_discarded = import_legacy_catalog(&mut database, config.catalog_rebuild)?;

    // -----------------------------------------------------------------------
    // 4. Initialize subsystems
    // -----------------------------------------------------------------------
    let store = Arc::new(AssetStore::new(config.upload_dir.clone(), config.storage_mode).await?);
    let db = DbHandle::new(database);
    let lock = WriterLock::new(config.lock_timeout);

    let app_state = AppState {
        library: AssetLibrary::new(db.clone(), store.clone(), lock.clone(), config.max_upload_size),
        reconciler: Reconciler::new(db.clone(), store.clone(), lock),
        db,
        store,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 5. Startup consistency check
    // -----------------------------------------------------------------------
    if config.sync_on_startup || legacy_discarded {
        startup_sync(&app_state.reconciler, config.catalog_rebuild, legacy_discarded).await;
    }

    // -----------------------------------------------------------------------
    // 6. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    if let Err(e) = api::serve(app_state, config.http_addr, shutdown).await {
        error!(error = %e, "HTTP server failed");
        return Err(e);
    }

    Ok(())
}

/// Move the legacy settings blob into the catalog table.
///
/// A blob that does not parse stops startup unless `rebuild` is set, in
/// which case it is discarded and the catalog is rebuilt from disk. Returns
/// whether it was discarded.
fn import_legacy_catalog(db: &mut Database, rebuild: bool) -> anyhow::Result<bool> {
    match db.import_legacy_catalog() {
        Ok(LegacyImport::NotPresent) => Ok(false),
        Ok(LegacyImport::Imported {
            imported,
            already_present,
        }) => {
            info!(imported, already_present, "Legacy background catalog migrated");
            Ok(false)
        }
        Err(StoreError::CorruptCatalog(msg)) if rebuild => {
            warn!(
                error = %msg,
                "Legacy catalog is corrupt, discarding it and rebuilding from disk"
            );
            db.discard_legacy_catalog()?;
            Ok(true)
        }
        Err(StoreError::CorruptCatalog(msg)) => Err(anyhow::anyhow!(
            "legacy background catalog is corrupt ({msg}); \
             set CATALOG_REBUILD=1 to discard it and rebuild the catalog from the asset directory"
        )),
        Err(e) => Err(e).context("failed to migrate legacy background catalog"),
    }
}

/// Reconcile if the catalog and the directory disagree. Failures are
/// logged; the server still starts.
async fn startup_sync(reconciler: &Reconciler, force: bool, rebuild: bool) {
    let needs_repair = match reconciler.validate().await {
        Ok(report) if report.is_consistent && !rebuild => {
            info!(assets = report.db_count, "Background catalog consistent");
            false
        }
        Ok(report) => {
            warn!(
                orphaned = report.orphaned_records.len(),
                missing = report.missing_records.len(),
                corrupt = report.corrupt_records.len(),
                "Background catalog inconsistent, reconciling"
            );
            true
        }
        Err(e) => {
            error!(error = %e, "Startup validation failed");
            return;
        }
    };

    if needs_repair {
        if let Err(e) = reconciler.reconcile(force).await {
            error!(error = %e, "Startup reconciliation failed; catalog left unchanged");
        }
    }
}
