//! CRUD operations for [`Note`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Note;

impl Database {
    pub fn create_note(&self, title: &str, content: &str) -> Result<Note> {
        let id = insert_note_in(self.conn(), title, content)?;
        self.get_note(id)
    }

    /// Insert `(title, content)` pairs in one transaction. Returns how many
    /// were written.
    pub fn import_notes(&mut self, notes: &[(String, String)]) -> Result<usize> {
        let tx = self.conn_mut().transaction()?;
        for (title, content) in notes {
            insert_note_in(&tx, title, content)?;
        }
        tx.commit()?;
        Ok(notes.len())
    }

    pub fn get_note(&self, id: i64) -> Result<Note> {
        self.conn()
            .query_row(
                "SELECT id, title, content, created_at, updated_at FROM notes WHERE id = ?1",
                params![id],
                row_to_note,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Most recently edited first.
    pub fn list_notes(&self) -> Result<Vec<Note>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, title, content, created_at, updated_at
             FROM notes
             ORDER BY updated_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], row_to_note)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Update title and/or content; `None` keeps the current value.
    pub fn update_note(&self, id: i64, title: Option<&str>, content: Option<&str>) -> Result<Note> {
        let affected = self.conn().execute(
            "UPDATE notes
             SET title = COALESCE(?2, title),
                 content = COALESCE(?3, content),
                 updated_at = ?4
             WHERE id = ?1",
            params![id, title, content, Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_note(id)
    }

    // ON DELETE SET NULL: todos created from this note keep existing
    pub fn delete_note(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM notes WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

fn insert_note_in(conn: &Connection, title: &str, content: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO notes (title, content, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![title, content, Utc::now().to_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    let created_str: String = row.get(3)?;
    let updated_str: String = row.get(4)?;

    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        created_at: parse_timestamp(&created_str, 3)?,
        updated_at: parse_timestamp(&updated_str, 4)?,
    })
}

pub(crate) fn parse_timestamp(s: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let note = db.create_note("Groceries", "milk").unwrap();
        assert_eq!(note.title, "Groceries");

        let updated = db.update_note(note.id, None, Some("milk, eggs")).unwrap();
        assert_eq!(updated.title, "Groceries");
        assert_eq!(updated.content, "milk, eggs");
        assert!(updated.updated_at >= note.updated_at);

        assert_eq!(db.list_notes().unwrap().len(), 1);
        assert!(db.delete_note(note.id).unwrap());
        assert!(matches!(db.get_note(note.id), Err(StoreError::NotFound)));
        assert!(matches!(
            db.update_note(note.id, Some("x"), None),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_orders_by_last_edit() {
        let db = Database::open_in_memory().unwrap();
        let first = db.create_note("first", "").unwrap();
        let second = db.create_note("second", "").unwrap();
        db.update_note(first.id, Some("first, edited"), None).unwrap();

        let ids: Vec<_> = db.list_notes().unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids[0], first.id);
        assert!(ids.contains(&second.id));
    }

    #[test]
    fn import_writes_every_note() {
        let mut db = Database::open_in_memory().unwrap();
        let notes = vec![
            ("a".to_string(), "one".to_string()),
            ("b".to_string(), "two".to_string()),
        ];
        assert_eq!(db.import_notes(&notes).unwrap(), 2);
        assert_eq!(db.list_notes().unwrap().len(), 2);
    }
}
