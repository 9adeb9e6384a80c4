//! v003 -- Pomodoro sessions and typed settings values.

use rusqlite::Connection;

const UP_SQL: &str = r#"
ALTER TABLE settings ADD COLUMN value_type TEXT NOT NULL DEFAULT 'string';

CREATE TABLE IF NOT EXISTS pomodoro_sessions (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    completed_at       TEXT NOT NULL,     -- fixed-width RFC-3339 UTC, sortable
    duration_minutes   INTEGER NOT NULL,
    associated_task_id INTEGER,
    session_type       TEXT NOT NULL DEFAULT 'work',

    FOREIGN KEY (associated_task_id) REFERENCES todos(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_pomodoro_completed_at ON pomodoro_sessions(completed_at);
CREATE INDEX IF NOT EXISTS idx_pomodoro_task ON pomodoro_sessions(associated_task_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
