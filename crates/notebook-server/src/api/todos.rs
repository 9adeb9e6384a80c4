use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use notebook_store::{NewTodo, Priority, Todo, TodoStats, TodoStatus, TodoUpdate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::import::{import_entries, read_json_upload, str_field, ImportResponse};
use super::AppState;
use crate::error::ServerError;

const DEFAULT_CATEGORY: &str = "default";

#[derive(Debug, Deserialize)]
pub(super) struct ListQuery {
    status: Option<String>,
    category: Option<String>,
}

#[derive(Serialize)]
pub(super) struct TodoList {
    todos: Vec<Todo>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateTodo {
    title: Option<String>,
    #[serde(default)]
    description: String,
    priority: Option<String>,
    category: Option<String>,
    due_date: Option<String>,
    #[serde(alias = "is_completed", default)]
    completed: bool,
    source_note_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateTodo {
    title: Option<String>,
    description: Option<String>,
    priority: Option<String>,
    category: Option<String>,
    /// Absent leaves the due date alone; `null` or `""` clears it.
    #[serde(default, deserialize_with = "present")]
    due_date: Option<Option<String>>,
    #[serde(alias = "is_completed")]
    completed: Option<bool>,
}

/// Distinguish an explicit `null` from a missing field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn parse_priority(raw: Option<&str>) -> Result<Option<Priority>, ServerError> {
    raw.map(|p| {
        Priority::parse(p)
            .ok_or_else(|| ServerError::BadRequest(format!("Invalid priority '{p}'")))
    })
    .transpose()
}

fn category_or_default(category: Option<&str>) -> String {
    category
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CATEGORY)
        .to_string()
}

/// Accepts RFC 3339 or a naive ISO timestamp (read as UTC). Empty means none.
fn parse_due_date(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ServerError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    raw.parse::<NaiveDateTime>()
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| ServerError::BadRequest(format!("Invalid due date '{raw}'")))
}

pub(super) async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<TodoList>, ServerError> {
    let status = match query.status.as_deref() {
        None | Some("") | Some("all") => TodoStatus::All,
        Some("pending") => TodoStatus::Pending,
        Some("completed") => TodoStatus::Completed,
        Some(other) => {
            return Err(ServerError::BadRequest(format!("Invalid status '{other}'")))
        }
    };
    let category = query.category.filter(|c| !c.is_empty());

    let todos = state
        .db
        .call(move |db| db.list_todos(status, category.as_deref()))
        .await?;
    Ok(Json(TodoList { todos }))
}

pub(super) async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Todo>, ServerError> {
    Ok(Json(state.db.call(move |db| db.get_todo(id)).await?))
}

pub(super) async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateTodo>,
) -> Result<(StatusCode, Json<Todo>), ServerError> {
    let title = body
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ServerError::BadRequest("Title is required".to_string()))?;

    let new = NewTodo {
        title,
        description: body.description,
        completed: body.completed,
        priority: parse_priority(body.priority.as_deref())?.unwrap_or_default(),
        category: category_or_default(body.category.as_deref()),
        due_date: parse_due_date(body.due_date.as_deref())?,
        source_note_id: body.source_note_id,
    };

    let todo = state.db.call(move |db| db.create_todo(&new)).await?;
    tracing::debug!(id = todo.id, "Todo created");
    Ok((StatusCode::CREATED, Json(todo)))
}

pub(super) async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateTodo>,
) -> Result<Json<Todo>, ServerError> {
    let due_date = match body.due_date {
        None => None,
        Some(raw) => Some(parse_due_date(raw.as_deref())?),
    };
    let update = TodoUpdate {
        title: body.title,
        description: body.description,
        completed: body.completed,
        priority: parse_priority(body.priority.as_deref())?,
        category: body.category,
        due_date,
    };

    Ok(Json(state.db.call(move |db| db.update_todo(id, &update)).await?))
}

pub(super) async fn toggle(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Todo>, ServerError> {
    Ok(Json(state.db.call(move |db| db.toggle_todo(id)).await?))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if !state.db.call(move |db| db.delete_todo(id)).await? {
        return Err(ServerError::NotFound(format!("Todo {id}")));
    }
    Ok(Json(serde_json::json!({ "message": "Todo deleted" })))
}

pub(super) async fn stats(
    State(state): State<AppState>,
) -> Result<Json<TodoStats>, ServerError> {
    Ok(Json(state.db.call(|db| db.todo_stats(Utc::now())).await?))
}

pub(super) async fn categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, ServerError> {
    Ok(Json(state.db.call(|db| db.todo_categories()).await?))
}

/// Lenient import: an unknown priority becomes the default and an
/// unparseable due date is dropped. Entries without a title are skipped.
fn todo_from_import(entry: &Value) -> Option<NewTodo> {
    let title = str_field(entry, "title").filter(|t| !t.trim().is_empty())?;
    let completed = entry
        .get("completed")
        .or_else(|| entry.get("is_completed"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Some(NewTodo {
        title: title.to_string(),
        description: str_field(entry, "description").unwrap_or_default().to_string(),
        completed,
        priority: str_field(entry, "priority")
            .and_then(Priority::parse)
            .unwrap_or_default(),
        category: category_or_default(str_field(entry, "category")),
        due_date: parse_due_date(str_field(entry, "due_date")).ok().flatten(),
        source_note_id: None,
    })
}

pub(super) async fn import(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ImportResponse>, ServerError> {
    let doc = read_json_upload(&state, multipart).await?;
    let todos: Vec<NewTodo> = import_entries(doc, "todos")?
        .iter()
        .filter_map(todo_from_import)
        .collect();

    let count = state.db.call(move |db| db.import_todos(&todos)).await?;
    tracing::info!(count, "Todos imported");
    Ok(Json(ImportResponse::new("todos", count)))
}
