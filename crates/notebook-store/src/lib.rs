//! # notebook-store
//!
//! SQLite persistence for the notebook backend.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model: the background asset catalog, settings and theme selections,
//! notes, todos and pomodoro sessions.

pub mod assets;
pub mod database;
pub mod legacy;
pub mod migrations;
pub mod models;
pub mod notes;
pub mod pomodoro;
pub mod retry;
pub mod settings;
pub mod todos;

mod error;

pub use assets::{CatalogRepair, CatalogScan};
pub use database::Database;
pub use error::{Result, StoreError};
pub use legacy::LegacyImport;
pub use models::*;
