use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use notebook_store::Note;
use serde::{Deserialize, Serialize};

use super::import::{import_entries, read_json_upload, str_field, ImportResponse};
use super::AppState;
use crate::error::ServerError;

const DEFAULT_TITLE: &str = "New note";

#[derive(Serialize)]
pub(super) struct NoteList {
    notes: Vec<Note>,
}

#[derive(Serialize)]
pub(super) struct NoteResponse {
    message: &'static str,
    note: Note,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct NoteBody {
    title: Option<String>,
    content: Option<String>,
}

pub(super) async fn list(State(state): State<AppState>) -> Result<Json<NoteList>, ServerError> {
    let notes = state.db.call(|db| db.list_notes()).await?;
    Ok(Json(NoteList { notes }))
}

pub(super) async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Note>, ServerError> {
    let note = state.db.call(move |db| db.get_note(id)).await?;
    Ok(Json(note))
}

pub(super) async fn create(
    State(state): State<AppState>,
    body: Option<Json<NoteBody>>,
) -> Result<(StatusCode, Json<NoteResponse>), ServerError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let title = body.title.unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let content = body.content.unwrap_or_default();

    let note = state.db.call(move |db| db.create_note(&title, &content)).await?;
    tracing::debug!(id = note.id, "Note created");

    Ok((
        StatusCode::CREATED,
        Json(NoteResponse {
            message: "Note created",
            note,
        }),
    ))
}

pub(super) async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<NoteBody>,
) -> Result<Json<NoteResponse>, ServerError> {
    let note = state
        .db
        .call(move |db| db.update_note(id, body.title.as_deref(), body.content.as_deref()))
        .await?;
    Ok(Json(NoteResponse {
        message: "Note updated",
        note,
    }))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if !state.db.call(move |db| db.delete_note(id)).await? {
        return Err(ServerError::NotFound(format!("Note {id}")));
    }
    Ok(Json(serde_json::json!({ "message": "Note deleted" })))
}

/// Import notes from an uploaded JSON export. Entries without a string
/// title and content are skipped.
pub(super) async fn import(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ImportResponse>, ServerError> {
    let doc = read_json_upload(&state, multipart).await?;
    let notes: Vec<(String, String)> = import_entries(doc, "notes")?
        .iter()
        .filter_map(|entry| {
            let title = str_field(entry, "title")?;
            let content = str_field(entry, "content")?;
            Some((title.to_string(), content.to_string()))
        })
        .collect();

    let count = state.db.call(move |db| db.import_notes(&notes)).await?;
    tracing::info!(count, "Notes imported");
    Ok(Json(ImportResponse::new("notes", count)))
}
