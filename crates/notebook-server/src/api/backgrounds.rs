//! Background upload, listing, serving, reconciliation and per-theme
//! selection.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use notebook_store::{AssetRecord, Theme};
use serde::{Deserialize, Serialize};

use super::{multipart_error, AppState};
use crate::asset_store::{split_extension, validate_file_name};
use crate::content_check::mime_for_extension;
use crate::error::ServerError;
use crate::library::{DeleteStatus, UploadRequest};
use crate::reconcile::{ConsistencyReport, ReconcileReport};

/// Extensions served from the asset directory.
const SERVABLE_EXTENSIONS: [&str; 9] = [
    "png", "jpg", "jpeg", "gif", "webp", "svg", "mp4", "webm", "mov",
];

/// Client-facing projection of a catalog entry.
#[derive(Debug, Serialize)]
pub struct BackgroundView {
    id: String,
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    url: String,
    thumbnail_url: Option<String>,
    size: u64,
    theme: &'static str,
}

impl From<&AssetRecord> for BackgroundView {
    fn from(record: &AssetRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.original_name.clone(),
            kind: record.kind.as_str(),
            url: record.url(),
            thumbnail_url: record.thumbnail_url(),
            size: record.size_bytes,
            theme: record.theme.as_str(),
        }
    }
}

pub(super) async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BackgroundView>, ServerError> {
    let mut file: Option<(String, Bytes)> = None;
    let mut theme: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(&state, e))? {
        match field.name().unwrap_or("") {
            "file" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let data = field.bytes().await.map_err(|e| multipart_error(&state, e))?;
                file = Some((file_name, data));
            }
            "theme" => {
                theme = Some(field.text().await.map_err(|e| multipart_error(&state, e))?);
            }
            _ => {}
        }
    }

    let Some((file_name, data)) = file else {
        return Err(ServerError::BadRequest(
            "Missing 'file' field in multipart form".to_string(),
        ));
    };
    if file_name.is_empty() {
        return Err(ServerError::BadRequest("No file selected".to_string()));
    }

    let record = state
        .library
        .upload(UploadRequest {
            file_name,
            data,
            theme,
        })
        .await?;

    Ok(Json(BackgroundView::from(&record)))
}

pub(super) async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<BackgroundView>>, ServerError> {
    let records = state.library.list().await?;
    Ok(Json(records.iter().map(BackgroundView::from).collect()))
}

#[derive(Serialize)]
pub(super) struct DeleteResponse {
    message: &'static str,
    status: DeleteStatus,
    cleared_selections: Vec<String>,
}

pub(super) async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ServerError> {
    let outcome = state.library.delete(&id).await?;

    let response = match outcome.status {
        DeleteStatus::NotFound => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "Background not found",
                "status": outcome.status,
            })),
        )
            .into_response(),
        DeleteStatus::FullyDeleted | DeleteStatus::DeletedButPhysicalCleanupFailed => {
            let message = if outcome.status == DeleteStatus::FullyDeleted {
                "Background deleted"
            } else {
                "Background record deleted, but physical file cleanup failed"
            };
            Json(DeleteResponse {
                message,
                status: outcome.status,
                cleared_selections: outcome.cleared_selections,
            })
            .into_response()
        }
    };
    Ok(response)
}

pub(super) async fn serve_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ServerError> {
    validate_file_name(&filename)?;
    let extension = split_extension(&filename)
        .map(|(_, ext)| ext)
        .filter(|ext| SERVABLE_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| ServerError::BadRequest("Unsupported file type".to_string()))?;

    let data = state.store.read(&filename).await?;

    Ok((
        [
            (header::CONTENT_TYPE, mime_for_extension(&extension)),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        data,
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct SyncRequest {
    #[serde(default)]
    force: bool,
}

#[derive(Serialize)]
pub(super) struct SyncResponse {
    message: &'static str,
    status: &'static str,
    #[serde(flatten)]
    report: ReconcileReport,
}

pub(super) async fn sync(
    State(state): State<AppState>,
    body: Option<Json<SyncRequest>>,
) -> Result<Json<SyncResponse>, ServerError> {
    let force = body.map(|Json(req)| req.force).unwrap_or(false);
    let report = state.reconciler.reconcile(force).await?;
    Ok(Json(SyncResponse {
        message: "Background catalog synchronized",
        status: "success",
        report,
    }))
}

#[derive(Serialize)]
pub(super) struct ValidateResponse {
    message: &'static str,
    status: &'static str,
    #[serde(flatten)]
    report: ConsistencyReport,
}

pub(super) async fn validate(
    State(state): State<AppState>,
) -> Result<Json<ValidateResponse>, ServerError> {
    let report = state.reconciler.validate().await?;
    Ok(Json(ValidateResponse {
        message: "Validation completed",
        status: "success",
        report,
    }))
}

// ─── Theme selection ───

#[derive(Debug, Deserialize)]
pub(super) struct ThemeQuery {
    theme: Option<String>,
}

fn parse_theme(raw: Option<&str>) -> Result<Option<Theme>, ServerError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => Theme::parse(raw)
            .map(Some)
            .ok_or_else(|| ServerError::BadRequest(format!("Invalid theme '{raw}'"))),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SelectionResponse {
    background_id: Option<String>,
    theme: &'static str,
}

pub(super) async fn get_selection(
    State(state): State<AppState>,
    Query(query): Query<ThemeQuery>,
) -> Result<Json<SelectionResponse>, ServerError> {
    let theme = parse_theme(query.theme.as_deref())?.unwrap_or_default();
    let background_id = state.db.call(move |db| db.theme_selection(theme)).await?;
    Ok(Json(SelectionResponse {
        background_id,
        theme: theme.as_str(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SelectionRequest {
    background_id: Option<String>,
    theme: Option<String>,
}

pub(super) async fn set_selection(
    State(state): State<AppState>,
    Json(req): Json<SelectionRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let theme = parse_theme(req.theme.as_deref())?.unwrap_or_default();
    let background_id = req.background_id.filter(|id| !id.is_empty());
    state.library.select(theme, background_id.clone()).await?;

    Ok(Json(serde_json::json!({
        "message": format!("{} theme background saved", theme.as_str()),
        "backgroundId": background_id,
        "theme": theme.as_str(),
    })))
}

pub(super) async fn clear_selection(
    State(state): State<AppState>,
    Query(query): Query<ThemeQuery>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let cleared = match parse_theme(query.theme.as_deref())? {
        Some(theme) => {
            let changed = state.db.call(move |db| db.clear_selection(theme)).await?;
            if changed {
                vec![theme.selection_key().to_string()]
            } else {
                Vec::new()
            }
        }
        None => state.db.call(|db| db.clear_all_selections()).await?,
    };

    Ok(Json(serde_json::json!({
        "message": "Background selection cleared",
        "cleared": cleared,
    })))
}
