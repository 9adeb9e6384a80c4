//! Pomodoro session log and daily/weekly totals.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Datelike, Duration, Local, NaiveTime, TimeZone, Utc};
use notebook_store::{NewPomodoroSession, SessionPage, SessionType};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ServerError;

const MAX_DURATION_MINUTES: u32 = 24 * 60;
const DEFAULT_PER_PAGE: u64 = 20;
const MAX_PER_PAGE: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    Today,
    Week,
}

impl Period {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "today" => Some(Period::Today),
            "week" => Some(Period::Week),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Period::Today => "today",
            Period::Week => "week",
        }
    }
}

/// `[start, end)` of the period containing `now`, in `now`'s time zone. A
/// week starts on Monday.
fn period_bounds<Tz: TimeZone>(
    period: Period,
    now: &DateTime<Tz>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.date_naive();
    let (first, days) = match period {
        Period::Today => (today, 1),
        Period::Week => (
            today - Duration::days(i64::from(today.weekday().num_days_from_monday())),
            7,
        ),
    };
    let start_of = |day: chrono::NaiveDate| {
        let naive = day.and_time(NaiveTime::MIN);
        naive
            .and_local_timezone(now.timezone())
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc())
    };
    (start_of(first), start_of(first + Duration::days(days)))
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateSession {
    duration: Option<u32>,
    task_id: Option<i64>,
    session_type: Option<String>,
}

#[derive(Serialize)]
pub(super) struct CreateResponse {
    message: &'static str,
    session_id: i64,
    today_count: u64,
}

#[derive(Debug, Deserialize)]
pub(super) struct ListQuery {
    page: Option<u64>,
    per_page: Option<u64>,
    task_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StatsQuery {
    period: Option<String>,
}

#[derive(Serialize)]
pub(super) struct StatsResponse {
    period: &'static str,
    completed_count: u64,
    total_minutes: u64,
    total_hours: f64,
}

pub(super) async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateSession>,
) -> Result<(StatusCode, Json<CreateResponse>), ServerError> {
    let duration_minutes = body
        .duration
        .filter(|m| (1..=MAX_DURATION_MINUTES).contains(m))
        .ok_or_else(|| {
            ServerError::BadRequest(format!(
                "Duration must be between 1 and {MAX_DURATION_MINUTES} minutes"
            ))
        })?;
    let session_type = match body.session_type.as_deref() {
        None | Some("") => SessionType::default(),
        Some(raw) => SessionType::parse(raw)
            .ok_or_else(|| ServerError::BadRequest(format!("Invalid session type '{raw}'")))?,
    };

    let new = NewPomodoroSession {
        completed_at: Utc::now(),
        duration_minutes,
        associated_task_id: body.task_id,
        session_type,
    };
    let session = state
        .db
        .call(move |db| db.record_pomodoro(&new))
        .await
        .map_err(|e| match (e, body.task_id) {
            (ServerError::NotFound(_), Some(id)) => ServerError::NotFound(format!("Task {id}")),
            (other, _) => other,
        })?;
    tracing::debug!(id = session.id, minutes = duration_minutes, "Pomodoro recorded");

    let (from, to) = period_bounds(Period::Today, &Local::now());
    let today = state
        .db
        .call(move |db| db.pomodoro_summary(from, to))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateResponse {
            message: "Pomodoro session recorded",
            session_id: session.id,
            today_count: today.completed_count,
        }),
    ))
}

pub(super) async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<SessionPage>, ServerError> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);
    let task_id = query.task_id;

    Ok(Json(
        state
            .db
            .call(move |db| db.list_pomodoros(page, per_page, task_id))
            .await?,
    ))
}

pub(super) async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsResponse>, ServerError> {
    let raw = query.period.unwrap_or_else(|| "today".to_string());
    let period = Period::parse(&raw)
        .ok_or_else(|| ServerError::BadRequest(format!("Invalid period '{raw}'")))?;

    let (from, to) = period_bounds(period, &Local::now());
    let summary = state
        .db
        .call(move |db| db.pomodoro_summary(from, to))
        .await?;

    Ok(Json(StatsResponse {
        period: period.as_str(),
        completed_count: summary.completed_count,
        total_minutes: summary.total_minutes,
        total_hours: (summary.total_minutes as f64 / 60.0 * 10.0).round() / 10.0,
    }))
}
