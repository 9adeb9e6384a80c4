//! Pomodoro session log.
//!
//! `completed_at` is written with a fixed width so window queries can
//! compare the stored strings directly.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, types::Value};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    NewPomodoroSession, PomodoroSession, PomodoroSummary, SessionPage, SessionType,
};
use crate::notes::parse_timestamp;
use crate::todos::todo_exists_in;

const SESSION_COLUMNS: &str =
    "id, completed_at, duration_minutes, associated_task_id, session_type";

fn sortable(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Database {
    /// Log a finished session. A linked todo must exist.
    pub fn record_pomodoro(&mut self, session: &NewPomodoroSession) -> Result<PomodoroSession> {
        let tx = self.conn_mut().transaction()?;
        if let Some(task_id) = session.associated_task_id {
            if !todo_exists_in(&tx, task_id)? {
                return Err(StoreError::NotFound);
            }
        }
        tx.execute(
            "INSERT INTO pomodoro_sessions
                 (completed_at, duration_minutes, associated_task_id, session_type)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                sortable(session.completed_at),
                session.duration_minutes,
                session.associated_task_id,
                session.session_type.as_str(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::debug!(id, minutes = session.duration_minutes, "pomodoro recorded");
        self.get_pomodoro(id)
    }

    pub fn get_pomodoro(&self, id: i64) -> Result<PomodoroSession> {
        let session = self
            .conn()
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM pomodoro_sessions WHERE id = ?1"),
                params![id],
                row_to_session,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        self.attach_task(session)
    }

    /// Newest first. `page` is 1-based; a page past the end is empty.
    pub fn list_pomodoros(
        &self,
        page: u64,
        per_page: u64,
        task_id: Option<i64>,
    ) -> Result<SessionPage> {
        let page = page.max(1);
        let per_page = per_page.max(1);

        let (filter, args): (&str, Vec<Value>) = match task_id {
            Some(id) => (" WHERE associated_task_id = ?1", vec![Value::Integer(id)]),
            None => ("", Vec::new()),
        };

        let total: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM pomodoro_sessions{filter}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM pomodoro_sessions{filter}
             ORDER BY completed_at DESC, id DESC
             LIMIT {per_page} OFFSET {offset}",
            offset = (page - 1) * per_page,
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), row_to_session)?;
        let sessions = rows
            .map(|row| row.map_err(StoreError::Sqlite).and_then(|s| self.attach_task(s)))
            .collect::<Result<Vec<_>>>()?;

        let total = total as u64;
        Ok(SessionPage {
            sessions,
            total,
            pages: total.div_ceil(per_page),
            current_page: page,
            per_page,
        })
    }

    /// Work sessions completed in `[from, to)`.
    pub fn pomodoro_summary(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<PomodoroSummary> {
        let (count, minutes): (i64, i64) = self.conn().query_row(
            "SELECT COUNT(*), COALESCE(SUM(duration_minutes), 0)
             FROM pomodoro_sessions
             WHERE session_type = 'work' AND completed_at >= ?1 AND completed_at < ?2",
            params![sortable(from), sortable(to)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(PomodoroSummary {
            completed_count: count as u64,
            total_minutes: minutes as u64,
        })
    }

    fn attach_task(&self, mut session: PomodoroSession) -> Result<PomodoroSession> {
        if let Some(task_id) = session.associated_task_id {
            session.associated_task = match self.get_todo(task_id) {
                Ok(todo) => Some(todo),
                Err(StoreError::NotFound) => None,
                Err(e) => return Err(e),
            };
        }
        Ok(session)
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<PomodoroSession> {
    let completed_str: String = row.get(1)?;
    let type_str: String = row.get(4)?;

    Ok(PomodoroSession {
        id: row.get(0)?,
        completed_at: parse_timestamp(&completed_str, 1)?,
        duration_minutes: row.get(2)?,
        associated_task_id: row.get(3)?,
        session_type: SessionType::parse(&type_str).unwrap_or_default(),
        associated_task: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::models::{NewTodo, Priority};

    fn session(minutes: u32, kind: SessionType, at: DateTime<Utc>) -> NewPomodoroSession {
        NewPomodoroSession {
            completed_at: at,
            duration_minutes: minutes,
            associated_task_id: None,
            session_type: kind,
        }
    }

    #[test]
    fn record_links_task_and_rejects_unknown_task() {
        let mut db = Database::open_in_memory().unwrap();
        let todo = db
            .create_todo(&NewTodo {
                title: "focus".into(),
                description: String::new(),
                completed: false,
                priority: Priority::High,
                category: "default".into(),
                due_date: None,
                source_note_id: None,
            })
            .unwrap();

        let mut linked = session(25, SessionType::Work, Utc::now());
        linked.associated_task_id = Some(todo.id);
        let recorded = db.record_pomodoro(&linked).unwrap();
        assert_eq!(recorded.associated_task.as_ref().map(|t| t.id), Some(todo.id));
        assert_eq!(recorded.duration_minutes, 25);

        linked.associated_task_id = Some(todo.id + 100);
        assert!(matches!(db.record_pomodoro(&linked), Err(StoreError::NotFound)));

        db.delete_todo(todo.id).unwrap();
        let orphan = db.get_pomodoro(recorded.id).unwrap();
        assert_eq!(orphan.associated_task_id, None);
        assert_eq!(orphan.associated_task, None);
    }

    #[test]
    fn summary_counts_work_sessions_in_window() {
        let mut db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.record_pomodoro(&session(25, SessionType::Work, now)).unwrap();
        db.record_pomodoro(&session(50, SessionType::Work, now - Duration::minutes(30)))
            .unwrap();
        db.record_pomodoro(&session(5, SessionType::ShortBreak, now)).unwrap();
        db.record_pomodoro(&session(25, SessionType::Work, now - Duration::days(2)))
            .unwrap();

        let summary = db
            .pomodoro_summary(now - Duration::hours(1), now + Duration::seconds(1))
            .unwrap();
        assert_eq!(summary.completed_count, 2);
        assert_eq!(summary.total_minutes, 75);
    }

    #[test]
    fn list_pages_newest_first() {
        let mut db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        for i in 0..5 {
            let at = now - Duration::minutes(i64::from(i));
            db.record_pomodoro(&session(i + 1, SessionType::Work, at)).unwrap();
        }

        let first = db.list_pomodoros(1, 2, None).unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.pages, 3);
        let minutes: Vec<_> = first.sessions.iter().map(|s| s.duration_minutes).collect();
        assert_eq!(minutes, vec![1, 2]);

        let last = db.list_pomodoros(3, 2, None).unwrap();
        assert_eq!(last.sessions.len(), 1);
        assert!(db.list_pomodoros(9, 2, None).unwrap().sessions.is_empty());
        assert_eq!(db.list_pomodoros(1, 20, Some(42)).unwrap().total, 0);
    }
}
