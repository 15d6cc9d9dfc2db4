//! Chat history attached to a translation.

use rusqlite::{params, Connection, Row};

use super::DatabaseError;

#[derive(Debug, Clone)]
pub struct ChatMessageRow {
    pub id: String,
    pub translation_id: String,
    pub role: String,
    pub content: String,
    /// JSON array of segment ids the message refers to.
    pub selected_segment_ids: String,
    pub created_at: String,
}

impl ChatMessageRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            translation_id: row.get("translation_id")?,
            role: row.get("role")?,
            content: row.get("content")?,
            selected_segment_ids: row.get("selected_segment_ids")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert(conn: &Connection, row: &ChatMessageRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO translation_chat_messages
         (id, translation_id, role, content, selected_segment_ids, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            row.id,
            row.translation_id,
            row.role,
            row.content,
            row.selected_segment_ids,
            row.created_at,
        ],
    )?;
    Ok(())
}

/// Messages for a translation in the order they were written.
pub fn list_for_translation(
    conn: &Connection,
    translation_id: &str,
) -> Result<Vec<ChatMessageRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM translation_chat_messages
         WHERE translation_id = ?1 ORDER BY created_at ASC, rowid ASC",
    )?;
    let rows = stmt
        .query_map(params![translation_id], ChatMessageRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_for_translation(conn: &Connection, translation_id: &str) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM translation_chat_messages WHERE translation_id = ?1",
        params![translation_id],
    )?;
    Ok(affected)
}
