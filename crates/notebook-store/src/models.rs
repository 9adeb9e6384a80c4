//! Domain model structs persisted in the notebook database.
//!
//! Every struct derives `Serialize` and `Deserialize` so handlers can hand
//! them straight to the HTTP layer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// URL prefix under which stored asset files are served.
pub const ASSET_URL_PREFIX: &str = "/api/backgrounds/file";

// ---------------------------------------------------------------------------
// Asset kind / theme
// ---------------------------------------------------------------------------

/// Media kind of a background asset, derived from its file extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
}

impl AssetKind {
    pub const IMAGE_EXTENSIONS: [&'static str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];
    pub const VIDEO_EXTENSIONS: [&'static str; 3] = ["mp4", "webm", "mov"];

    /// Classify a (case-insensitive) file extension. `None` for anything
    /// outside the upload allow-list.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        if Self::IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(AssetKind::Image)
        } else if Self::VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(AssetKind::Video)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(AssetKind::Image),
            "video" => Some(AssetKind::Video),
            _ => None,
        }
    }
}

/// UI theme a background is classified under.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub const ALL: [Theme; 2] = [Theme::Light, Theme::Dark];

    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }

    /// Best-guess classification from a file name: anything mentioning
    /// "dark" is dark, everything else is light.
    pub fn infer_from_name(name: &str) -> Self {
        if name.to_ascii_lowercase().contains("dark") {
            Theme::Dark
        } else {
            Theme::Light
        }
    }

    /// Settings key holding this theme's selected background.
    pub fn selection_key(&self) -> &'static str {
        match self {
            Theme::Light => "current_background_light",
            Theme::Dark => "current_background_dark",
        }
    }
}

// ---------------------------------------------------------------------------
// Background asset
// ---------------------------------------------------------------------------

/// Where the bytes of an asset live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "storage", rename_all = "lowercase")]
pub enum StorageLocation {
    /// A file inside the asset directory, named `{id}.{ext}`.
    File { file_name: String },
    /// A `data:` URL carrying the whole payload, used when the deployment
    /// has no writable filesystem.
    Inline { data_url: String },
}

impl StorageLocation {
    pub(crate) fn kind_str(&self) -> &'static str {
        match self {
            StorageLocation::File { .. } => "file",
            StorageLocation::Inline { .. } => "inline",
        }
    }

    pub(crate) fn value(&self) -> &str {
        match self {
            StorageLocation::File { file_name } => file_name,
            StorageLocation::Inline { data_url } => data_url,
        }
    }
}

/// One entry of the background catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetRecord {
    /// Opaque identifier; file-backed assets are stored as `{id}.{ext}`.
    pub id: String,
    /// Sanitized user-supplied file name.
    pub original_name: String,
    pub storage: StorageLocation,
    /// Thumbnail file name inside the asset directory (images only).
    pub thumbnail: Option<String>,
    pub kind: AssetKind,
    /// Size recorded at upload time. Not re-checked against the file.
    pub size_bytes: u64,
    pub theme: Theme,
    pub uploaded_at: DateTime<Utc>,
    pub security_scan_passed: bool,
}

impl AssetRecord {
    /// URL a client uses to fetch the asset.
    pub fn url(&self) -> String {
        match &self.storage {
            StorageLocation::File { file_name } => format!("{ASSET_URL_PREFIX}/{file_name}"),
            StorageLocation::Inline { data_url } => data_url.clone(),
        }
    }

    pub fn thumbnail_url(&self) -> Option<String> {
        self.thumbnail
            .as_ref()
            .map(|name| format!("{ASSET_URL_PREFIX}/{name}"))
    }

    /// File name in the asset directory, if the asset is file-backed.
    pub fn file_name(&self) -> Option<&str> {
        match &self.storage {
            StorageLocation::File { file_name } => Some(file_name),
            StorageLocation::Inline { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Notes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Todos
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub priority: Priority,
    pub category: String,
    pub due_date: Option<DateTime<Utc>>,
    pub source_note_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a todo; the id and timestamps are assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTodo {
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub priority: Priority,
    pub category: String,
    pub due_date: Option<DateTime<Utc>>,
    pub source_note_id: Option<i64>,
}

/// Partial update; `None` leaves a field unchanged. `due_date: Some(None)`
/// clears the due date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub due_date: Option<Option<DateTime<Utc>>>,
}

/// Filter for listing todos.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TodoStatus {
    #[default]
    All,
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct PriorityStats {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TodoStats {
    pub total: u64,
    pub completed: u64,
    pub pending: u64,
    /// Percentage, rounded to one decimal.
    pub completion_rate: f64,
    pub priority_stats: PriorityStats,
    /// Todo count per category.
    pub category_stats: BTreeMap<String, u64>,
    pub overdue: u64,
}

// ---------------------------------------------------------------------------
// Pomodoro
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[default]
    Work,
    ShortBreak,
    LongBreak,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Work => "work",
            SessionType::ShortBreak => "short_break",
            SessionType::LongBreak => "long_break",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "work" => Some(SessionType::Work),
            "short_break" => Some(SessionType::ShortBreak),
            "long_break" => Some(SessionType::LongBreak),
            _ => None,
        }
    }
}

/// A finished pomodoro, with the todo it was spent on when there is one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PomodoroSession {
    pub id: i64,
    pub completed_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub associated_task_id: Option<i64>,
    pub session_type: SessionType,
    pub associated_task: Option<Todo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPomodoroSession {
    pub completed_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub associated_task_id: Option<i64>,
    pub session_type: SessionType,
}

/// One page of session history, newest first.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionPage {
    pub sessions: Vec<PomodoroSession>,
    pub total: u64,
    pub pages: u64,
    pub current_page: u64,
    pub per_page: u64,
}

/// Work sessions finished inside a time window.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct PomodoroSummary {
    pub completed_count: u64,
    pub total_minutes: u64,
}

// ---------------------------------------------------------------------------
// Typed settings
// ---------------------------------------------------------------------------

/// How a settings value is stored in its text column.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    #[default]
    String,
    Boolean,
    Integer,
    Float,
    Json,
}

impl SettingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::String => "string",
            SettingType::Boolean => "boolean",
            SettingType::Integer => "integer",
            SettingType::Float => "float",
            SettingType::Json => "json",
        }
    }

    /// Unknown tags read back as plain strings.
    pub fn parse(s: &str) -> Self {
        match s {
            "boolean" => SettingType::Boolean,
            "integer" => SettingType::Integer,
            "float" => SettingType::Float,
            "json" => SettingType::Json,
            _ => SettingType::String,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Setting {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(rename = "type")]
    pub value_type: SettingType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension_is_case_insensitive() {
        assert_eq!(AssetKind::from_extension("PNG"), Some(AssetKind::Image));
        assert_eq!(AssetKind::from_extension("mov"), Some(AssetKind::Video));
        assert_eq!(AssetKind::from_extension("exe"), None);
    }

    #[test]
    fn theme_inference_prefers_dark() {
        assert_eq!(Theme::infer_from_name("Night_DARK_sky.png"), Theme::Dark);
        assert_eq!(Theme::infer_from_name("light-beach.jpg"), Theme::Light);
        assert_eq!(Theme::infer_from_name("beach.jpg"), Theme::Light);
    }

    #[test]
    fn record_urls() {
        let mut record = AssetRecord {
            id: "abc".into(),
            original_name: "a.png".into(),
            storage: StorageLocation::File {
                file_name: "abc.png".into(),
            },
            thumbnail: Some("abc_thumb.png".into()),
            kind: AssetKind::Image,
            size_bytes: 3,
            theme: Theme::Light,
            uploaded_at: Utc::now(),
            security_scan_passed: true,
        };
        assert_eq!(record.url(), "/api/backgrounds/file/abc.png");
        assert_eq!(
            record.thumbnail_url().as_deref(),
            Some("/api/backgrounds/file/abc_thumb.png")
        );

        record.storage = StorageLocation::Inline {
            data_url: "data:image/png;base64,AAA=".into(),
        };
        assert_eq!(record.url(), "data:image/png;base64,AAA=");
        assert!(record.file_name().is_none());
    }
}
