//! JSON file imports for notes and todos.

use axum::extract::Multipart;
use serde::Serialize;
use serde_json::Value;

use super::{multipart_error, AppState};
use crate::error::ServerError;

#[derive(Serialize)]
pub(super) struct ImportResponse {
    message: String,
    imported_count: usize,
}

impl ImportResponse {
    pub(super) fn new(what: &str, imported_count: usize) -> Self {
        Self {
            message: format!("Imported {imported_count} {what}"),
            imported_count,
        }
    }
}

/// Read the `file` field of an import form and parse it as JSON.
pub(super) async fn read_json_upload(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<Value, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(state, e))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            return Err(ServerError::BadRequest("No file selected".to_string()));
        }
        if !file_name.to_ascii_lowercase().ends_with(".json") {
            return Err(ServerError::BadRequest(
                "Only JSON files can be imported".to_string(),
            ));
        }
        let data = field.bytes().await.map_err(|e| multipart_error(state, e))?;
        return serde_json::from_slice(&data)
            .map_err(|e| ServerError::BadRequest(format!("Invalid JSON file: {e}")));
    }
    Err(ServerError::BadRequest(
        "Missing 'file' field in multipart form".to_string(),
    ))
}

/// The entries of an import document: either a bare array or an export
/// object holding the array under `key`.
pub(super) fn import_entries(doc: Value, key: &str) -> Result<Vec<Value>, ServerError> {
    let entries = match doc {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    };
    entries.ok_or_else(|| ServerError::BadRequest(format!("Expected a list of {key}")))
}

/// A string field of an import entry.
pub(super) fn str_field<'a>(entry: &'a Value, name: &str) -> Option<&'a str> {
    entry.get(name).and_then(Value::as_str)
}
