//! CRUD operations for [`Todo`] records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{NewTodo, Priority, PriorityStats, Todo, TodoStats, TodoStatus, TodoUpdate};
use crate::notes::parse_timestamp;

const TODO_COLUMNS: &str = "id, title, description, completed, priority, category, due_date, \
                            source_note_id, created_at, updated_at";

impl Database {
    pub fn create_todo(&self, todo: &NewTodo) -> Result<Todo> {
        let id = insert_todo_in(self.conn(), todo)?;
        self.get_todo(id)
    }

    /// Insert every todo in one transaction. Returns how many were written.
    pub fn import_todos(&mut self, todos: &[NewTodo]) -> Result<usize> {
        let tx = self.conn_mut().transaction()?;
        for todo in todos {
            insert_todo_in(&tx, todo)?;
        }
        tx.commit()?;
        Ok(todos.len())
    }

    pub fn get_todo(&self, id: i64) -> Result<Todo> {
        self.conn()
            .query_row(
                &format!("SELECT {TODO_COLUMNS} FROM todos WHERE id = ?1"),
                params![id],
                row_to_todo,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Newest first, optionally filtered by completion state and category.
    pub fn list_todos(&self, status: TodoStatus, category: Option<&str>) -> Result<Vec<Todo>> {
        let mut sql = format!("SELECT {TODO_COLUMNS} FROM todos WHERE 1 = 1");
        let mut args: Vec<Value> = Vec::new();

        match status {
            TodoStatus::All => {}
            TodoStatus::Pending => sql.push_str(" AND completed = 0"),
            TodoStatus::Completed => sql.push_str(" AND completed = 1"),
        }
        if let Some(category) = category {
            args.push(Value::Text(category.to_string()));
            sql.push_str(&format!(" AND category = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_todo)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn update_todo(&self, id: i64, update: &TodoUpdate) -> Result<Todo> {
        let mut todo = self.get_todo(id)?;

        if let Some(title) = &update.title {
            todo.title = title.clone();
        }
        if let Some(description) = &update.description {
            todo.description = description.clone();
        }
        if let Some(completed) = update.completed {
            todo.completed = completed;
        }
        if let Some(priority) = update.priority {
            todo.priority = priority;
        }
        if let Some(category) = &update.category {
            todo.category = category.clone();
        }
        if let Some(due_date) = update.due_date {
            todo.due_date = due_date;
        }

        self.conn().execute(
            "UPDATE todos
             SET title = ?2, description = ?3, completed = ?4, priority = ?5,
                 category = ?6, due_date = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                id,
                todo.title,
                todo.description,
                todo.completed as i32,
                todo.priority.as_str(),
                todo.category,
                todo.due_date.map(|d| d.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        self.get_todo(id)
    }

    /// Flip the completion flag.
    pub fn toggle_todo(&self, id: i64) -> Result<Todo> {
        let affected = self.conn().execute(
            "UPDATE todos SET completed = 1 - completed, updated_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_todo(id)
    }

    pub fn delete_todo(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM todos WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// Distinct non-empty categories, sorted.
    pub fn todo_categories(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT DISTINCT category FROM todos WHERE category != '' ORDER BY category",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn todo_stats(&self, now: DateTime<Utc>) -> Result<TodoStats> {
        let (total, completed): (i64, i64) = self.conn().query_row(
            "SELECT COUNT(*), COALESCE(SUM(completed), 0) FROM todos",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        // Due dates are compared after parsing; the stored strings are not
        // guaranteed to share a fractional-second width.
        let mut stmt = self
            .conn()
            .prepare("SELECT due_date FROM todos WHERE completed = 0 AND due_date IS NOT NULL")?;
        let mut overdue = 0u64;
        for due in stmt.query_map([], |row| row.get::<_, String>(0))? {
            if parse_timestamp(&due?, 0)? < now {
                overdue += 1;
            }
        }

        let mut priority_stats = PriorityStats::default();
        let mut stmt = self
            .conn()
            .prepare("SELECT priority, COUNT(*) FROM todos GROUP BY priority")?;
        for row in stmt.query_map([], count_row)? {
            let (priority, count) = row?;
            match Priority::parse(&priority).unwrap_or_default() {
                Priority::High => priority_stats.high += count as u64,
                Priority::Medium => priority_stats.medium += count as u64,
                Priority::Low => priority_stats.low += count as u64,
            }
        }

        let mut category_stats = BTreeMap::new();
        let mut stmt = self
            .conn()
            .prepare("SELECT category, COUNT(*) FROM todos GROUP BY category")?;
        for row in stmt.query_map([], count_row)? {
            let (category, count) = row?;
            category_stats.insert(category, count as u64);
        }

        let completion_rate = if total > 0 {
            (completed as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        Ok(TodoStats {
            total: total as u64,
            completed: completed as u64,
            pending: (total - completed) as u64,
            completion_rate,
            priority_stats,
            category_stats,
            overdue,
        })
    }
}

/// A `(label, COUNT(*))` row of a GROUP BY query.
fn count_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, i64)> {
    Ok((row.get(0)?, row.get(1)?))
}

pub(crate) fn todo_exists_in(conn: &Connection, id: i64) -> Result<bool> {
    let found: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM todos WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    Ok(found != 0)
}

fn insert_todo_in(conn: &Connection, todo: &NewTodo) -> Result<i64> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO todos (title, description, completed, priority, category, due_date,
                            source_note_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            todo.title,
            todo.description,
            todo.completed as i32,
            todo.priority.as_str(),
            todo.category,
            todo.due_date.map(|d| d.to_rfc3339()),
            todo.source_note_id,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_todo(row: &rusqlite::Row<'_>) -> rusqlite::Result<Todo> {
    let completed: i32 = row.get(3)?;
    let priority_str: String = row.get(4)?;
    let due_str: Option<String> = row.get(6)?;
    let created_str: String = row.get(8)?;
    let updated_str: String = row.get(9)?;

    let priority = Priority::parse(&priority_str).unwrap_or_default();
    let due_date = due_str.as_deref().map(|s| parse_timestamp(s, 6)).transpose()?;

    Ok(Todo {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        completed: completed != 0,
        priority,
        category: row.get(5)?,
        due_date,
        source_note_id: row.get(7)?,
        created_at: parse_timestamp(&created_str, 8)?,
        updated_at: parse_timestamp(&updated_str, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_todo(title: &str) -> NewTodo {
        NewTodo {
            title: title.to_string(),
            description: String::new(),
            completed: false,
            priority: Priority::Medium,
            category: "default".to_string(),
            due_date: None,
            source_note_id: None,
        }
    }

    #[test]
    fn create_update_toggle_delete() {
        let db = Database::open_in_memory().unwrap();
        let todo = db.create_todo(&new_todo("write tests")).unwrap();
        assert!(!todo.completed);

        let update = TodoUpdate {
            priority: Some(Priority::High),
            category: Some("work".into()),
            ..Default::default()
        };
        let updated = db.update_todo(todo.id, &update).unwrap();
        assert_eq!(updated.priority, Priority::High);
        assert_eq!(updated.category, "work");
        assert_eq!(updated.title, "write tests");

        assert!(db.toggle_todo(todo.id).unwrap().completed);
        assert!(!db.toggle_todo(todo.id).unwrap().completed);

        assert!(db.delete_todo(todo.id).unwrap());
        assert!(matches!(db.toggle_todo(todo.id), Err(StoreError::NotFound)));
    }

    #[test]
    fn list_filters() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_todo(&new_todo("a")).unwrap();
        let mut b = new_todo("b");
        b.category = "home".into();
        db.create_todo(&b).unwrap();
        db.toggle_todo(a.id).unwrap();

        assert_eq!(db.list_todos(TodoStatus::All, None).unwrap().len(), 2);
        assert_eq!(db.list_todos(TodoStatus::Completed, None).unwrap()[0].id, a.id);
        assert_eq!(db.list_todos(TodoStatus::Pending, Some("home")).unwrap().len(), 1);
        assert!(db.list_todos(TodoStatus::Pending, Some("work")).unwrap().is_empty());
    }

    #[test]
    fn deleting_source_note_keeps_todo() {
        let db = Database::open_in_memory().unwrap();
        let note = db.create_note("n", "").unwrap();
        let mut todo = new_todo("from note");
        todo.source_note_id = Some(note.id);
        let todo = db.create_todo(&todo).unwrap();

        db.delete_note(note.id).unwrap();
        assert_eq!(db.get_todo(todo.id).unwrap().source_note_id, None);
    }

    #[test]
    fn stats_count_overdue_pending_only() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        let mut late = new_todo("late");
        late.due_date = Some(now - Duration::days(1));
        db.create_todo(&late).unwrap();

        let mut done_late = new_todo("done late");
        done_late.due_date = Some(now - Duration::days(2));
        done_late.completed = true;
        db.create_todo(&done_late).unwrap();

        let mut future = new_todo("future");
        future.due_date = Some(now + Duration::days(1));
        db.create_todo(&future).unwrap();

        let stats = db.todo_stats(now).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.completion_rate, 33.3);
        assert_eq!(stats.priority_stats.medium, 3);
        assert_eq!(stats.category_stats.get("default"), Some(&3));
    }

    #[test]
    fn categories_are_distinct_and_sorted() {
        let db = Database::open_in_memory().unwrap();
        for category in ["work", "home", "work", ""] {
            let mut todo = new_todo(category);
            todo.category = category.to_string();
            db.create_todo(&todo).unwrap();
        }
        assert_eq!(db.todo_categories().unwrap(), vec!["home", "work"]);
    }

    #[test]
    fn import_is_all_or_nothing() {
        let mut db = Database::open_in_memory().unwrap();
        assert_eq!(db.import_todos(&[new_todo("a"), new_todo("b")]).unwrap(), 2);

        let mut dangling = new_todo("dangling");
        dangling.source_note_id = Some(999);
        assert!(db.import_todos(&[new_todo("c"), dangling]).is_err());
        assert_eq!(db.list_todos(TodoStatus::All, None).unwrap().len(), 2);
    }
}
