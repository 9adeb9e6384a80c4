//! Free-form settings. Keys are flat dotted paths in storage and nested
//! objects on the wire; the background selection keys are read-only here.

use axum::{
    extract::{Path, State},
    Json,
};
use notebook_store::{settings::is_reserved_setting, Setting};
use serde::Serialize;
use serde_json::{Map, Value};

use super::AppState;
use crate::error::ServerError;

#[derive(Serialize)]
pub(super) struct UpdateResponse {
    message: String,
    updated: usize,
}

/// Insert `value` at the dotted `key` path, replacing any scalar found at a
/// parent segment.
fn insert_nested(root: &mut Map<String, Value>, key: &str, value: Value) {
    let mut segments: Vec<&str> = key.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };
    let mut current = root;
    for segment in segments {
        let slot = current
            .entry(segment)
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(leaf.to_string(), value);
}

/// Flatten nested objects into dotted keys. Arrays and scalars are leaves.
fn flatten_into(prefix: Option<&str>, map: Map<String, Value>, out: &mut Vec<(String, Value)>) {
    for (key, value) in map {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key,
        };
        match value {
            Value::Object(child) => flatten_into(Some(&path), child, out),
            leaf => out.push((path, leaf)),
        }
    }
}

fn check_writable(key: &str) -> Result<(), ServerError> {
    if key.is_empty() || key.split('.').any(str::is_empty) {
        return Err(ServerError::BadRequest(format!("Invalid setting key '{key}'")));
    }
    if is_reserved_setting(key) {
        return Err(ServerError::BadRequest(format!(
            "Setting '{key}' is managed by /api/settings/background"
        )));
    }
    Ok(())
}

pub(super) async fn list(State(state): State<AppState>) -> Result<Json<Value>, ServerError> {
    let settings = state.db.call(|db| db.list_typed_settings()).await?;
    let mut root = Map::new();
    for setting in settings {
        insert_nested(&mut root, &setting.key, setting.value);
    }
    Ok(Json(Value::Object(root)))
}

pub(super) async fn update_many(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<UpdateResponse>, ServerError> {
    let map = match body {
        Value::Object(map) if !map.is_empty() => map,
        _ => {
            return Err(ServerError::BadRequest(
                "Expected a non-empty settings object".to_string(),
            ))
        }
    };

    let mut entries = Vec::new();
    flatten_into(None, map, &mut entries);
    for (key, _) in &entries {
        check_writable(key)?;
    }

    let updated = entries.len();
    state
        .db
        .call(move |db| db.put_typed_settings(&entries))
        .await?;
    tracing::debug!(updated, "Settings updated");

    Ok(Json(UpdateResponse {
        message: "Settings updated".to_string(),
        updated,
    }))
}

pub(super) async fn fetch(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Setting>, ServerError> {
    let lookup = key.clone();
    state
        .db
        .call(move |db| db.get_typed_setting(&lookup))
        .await?
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("Setting '{key}'")))
}

pub(super) async fn update(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<UpdateResponse>, ServerError> {
    check_writable(&key)?;
    let Some(value) = body.get("value").cloned() else {
        return Err(ServerError::BadRequest("Missing 'value' field".to_string()));
    };

    let entries = vec![(key.clone(), value)];
    state
        .db
        .call(move |db| db.put_typed_settings(&entries))
        .await?;

    Ok(Json(UpdateResponse {
        message: format!("Setting '{key}' updated"),
        updated: 1,
    }))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ServerError> {
    check_writable(&key)?;
    let target = key.clone();
    if !state.db.call(move |db| db.delete_setting(&target)).await? {
        return Err(ServerError::NotFound(format!("Setting '{key}'")));
    }
    Ok(Json(serde_json::json!({ "message": format!("Setting '{key}' deleted") })))
}
