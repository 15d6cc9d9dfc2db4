//! Translation repository — rows of `translations`, `translation_paragraphs`
//! and `translation_segments`.
//!
//! Functions take a `&Connection` so callers can compose several of them
//! inside one `Database::with_tx` transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw translation row from the database.
#[derive(Debug, Clone)]
pub struct TranslationRow {
    pub id: String,
    pub source_kind: String,
    pub input_text: String,
    pub status: String,
    pub progress: i64,
    pub total: i64,
    pub full_translation: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TranslationRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            source_kind: row.get("source_kind")?,
            input_text: row.get("input_text")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            total: row.get("total")?,
            full_translation: row.get("full_translation")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParagraphRow {
    pub paragraph_idx: i64,
    pub indent: String,
    pub separator: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRow {
    pub paragraph_idx: i64,
    pub seg_idx: i64,
    pub segment_text: String,
    pub pinyin: String,
    pub english: String,
}

/// Outcome of an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Query filter parameters for translation listing.
#[derive(Debug, Default, Clone)]
pub struct TranslationFilter {
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new translation row.
pub fn insert(conn: &Connection, row: &TranslationRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO translations (id, source_kind, input_text, status, progress, total,
         full_translation, error_message, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            row.id,
            row.source_kind,
            row.input_text,
            row.status,
            row.progress,
            row.total,
            row.full_translation,
            row.error_message,
            row.created_at,
            row.updated_at,
        ],
    )?;
    Ok(())
}

/// Finds a translation by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<TranslationRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM translations WHERE id = ?1",
            params![id],
            TranslationRow::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn exists(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM translations WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Returns the status column alone, `None` if the row is gone.
pub fn status_of(conn: &Connection, id: &str) -> Result<Option<String>, DatabaseError> {
    let status = conn
        .query_row(
            "SELECT status FROM translations WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(status)
}

/// Queries translations newest first, returning (rows, total_count).
pub fn query(
    conn: &Connection,
    filter: &TranslationFilter,
) -> Result<(Vec<TranslationRow>, u64), DatabaseError> {
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let where_clause = match filter.status {
        Some(ref status) => {
            param_values.push(Box::new(status.clone()));
            "WHERE status = ?1".to_string()
        }
        None => String::new(),
    };

    let count_sql = format!("SELECT COUNT(*) FROM translations {}", where_clause);
    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

    let limit = filter.limit.unwrap_or(20) as i64;
    let offset = filter.offset.unwrap_or(0) as i64;
    param_values.push(Box::new(limit));
    param_values.push(Box::new(offset));
    // rowid breaks ties between rows created within the same microsecond.
    let query_sql = format!(
        "SELECT * FROM translations {} ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
        where_clause,
        param_values.len() - 1,
        param_values.len()
    );

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query_sql)?;
    let rows: Vec<TranslationRow> = stmt
        .query_map(params_ref.as_slice(), TranslationRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((rows, total))
}

/// Deletes a translation; paragraphs, segments, lease and chat rows cascade.
pub fn delete(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let affected = conn.execute("DELETE FROM translations WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

pub fn mark_processing(conn: &Connection, id: &str, now: &str) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE translations SET status = 'processing', updated_at = ?2
         WHERE id = ?1 AND status IN ('pending', 'processing')",
        params![id, now],
    )?;
    Ok(affected)
}

/// `processing → completed`. Progress and total collapse to the persisted
/// segment count. Returns the number of rows changed (0 on wrong state).
pub fn mark_completed(
    conn: &Connection,
    id: &str,
    full_translation: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE translations
         SET status = 'completed',
             full_translation = ?2,
             error_message = NULL,
             progress = (SELECT COUNT(*) FROM translation_segments WHERE translation_id = ?1),
             total = (SELECT COUNT(*) FROM translation_segments WHERE translation_id = ?1),
             updated_at = ?3
         WHERE id = ?1 AND status = 'processing'",
        params![id, full_translation, now],
    )?;
    Ok(affected)
}

/// Marks a translation failed unless it already completed.
pub fn mark_failed(
    conn: &Connection,
    id: &str,
    message: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE translations SET status = 'failed', error_message = ?2, updated_at = ?3
         WHERE id = ?1 AND status != 'completed'",
        params![id, message, now],
    )?;
    Ok(affected)
}

/// Returns a non-terminal translation to `pending` for another attempt.
pub fn mark_pending(
    conn: &Connection,
    id: &str,
    message: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE translations SET status = 'pending', error_message = ?2, updated_at = ?3
         WHERE id = ?1 AND status IN ('pending', 'processing')",
        params![id, message, now],
    )?;
    Ok(affected)
}

pub fn set_total(conn: &Connection, id: &str, total: i64, now: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE translations SET total = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, total, now],
    )?;
    Ok(())
}

/// Recomputes `progress` from the persisted segment count and raises
/// `total` when the count overtakes it. Returns (progress, total).
pub fn refresh_progress(
    conn: &Connection,
    id: &str,
    now: &str,
) -> Result<(i64, i64), DatabaseError> {
    conn.execute(
        "UPDATE translations
         SET progress = (SELECT COUNT(*) FROM translation_segments WHERE translation_id = ?1),
             updated_at = ?2
         WHERE id = ?1",
        params![id, now],
    )?;
    conn.execute(
        "UPDATE translations SET total = progress WHERE id = ?1 AND total < progress",
        params![id],
    )?;
    let counts = conn.query_row(
        "SELECT progress, total FROM translations WHERE id = ?1",
        params![id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    Ok(counts)
}

/// Inserts or refreshes a paragraph keyed by (translation, index).
pub fn upsert_paragraph(
    conn: &Connection,
    id: &str,
    paragraph: &ParagraphRow,
) -> Result<UpsertOutcome, DatabaseError> {
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT indent, separator FROM translation_paragraphs
             WHERE translation_id = ?1 AND paragraph_idx = ?2",
            params![id, paragraph.paragraph_idx],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    match existing {
        Some((indent, separator)) if indent == paragraph.indent && separator == paragraph.separator => {
            Ok(UpsertOutcome::Unchanged)
        }
        Some(_) => {
            conn.execute(
                "UPDATE translation_paragraphs SET indent = ?3, separator = ?4
                 WHERE translation_id = ?1 AND paragraph_idx = ?2",
                params![id, paragraph.paragraph_idx, paragraph.indent, paragraph.separator],
            )?;
            Ok(UpsertOutcome::Updated)
        }
        None => {
            conn.execute(
                "INSERT INTO translation_paragraphs (translation_id, paragraph_idx, indent, separator)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, paragraph.paragraph_idx, paragraph.indent, paragraph.separator],
            )?;
            Ok(UpsertOutcome::Inserted)
        }
    }
}

/// Creates an empty paragraph row if none exists yet for the index.
pub fn ensure_paragraph(conn: &Connection, id: &str, paragraph_idx: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO translation_paragraphs (translation_id, paragraph_idx, indent, separator)
         VALUES (?1, ?2, '', '')
         ON CONFLICT (translation_id, paragraph_idx) DO NOTHING",
        params![id, paragraph_idx],
    )?;
    Ok(())
}

/// Inserts or refreshes a segment keyed by (translation, paragraph, index).
pub fn upsert_segment(
    conn: &Connection,
    id: &str,
    segment: &SegmentRow,
    now: &str,
) -> Result<UpsertOutcome, DatabaseError> {
    let existing: Option<(String, String, String)> = conn
        .query_row(
            "SELECT segment_text, pinyin, english FROM translation_segments
             WHERE translation_id = ?1 AND paragraph_idx = ?2 AND seg_idx = ?3",
            params![id, segment.paragraph_idx, segment.seg_idx],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;

    match existing {
        Some((text, pinyin, english))
            if text == segment.segment_text
                && pinyin == segment.pinyin
                && english == segment.english =>
        {
            Ok(UpsertOutcome::Unchanged)
        }
        Some(_) => {
            conn.execute(
                "UPDATE translation_segments SET segment_text = ?4, pinyin = ?5, english = ?6
                 WHERE translation_id = ?1 AND paragraph_idx = ?2 AND seg_idx = ?3",
                params![
                    id,
                    segment.paragraph_idx,
                    segment.seg_idx,
                    segment.segment_text,
                    segment.pinyin,
                    segment.english,
                ],
            )?;
            Ok(UpsertOutcome::Updated)
        }
        None => {
            conn.execute(
                "INSERT INTO translation_segments
                 (translation_id, paragraph_idx, seg_idx, segment_text, pinyin, english, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    segment.paragraph_idx,
                    segment.seg_idx,
                    segment.segment_text,
                    segment.pinyin,
                    segment.english,
                    now,
                ],
            )?;
            Ok(UpsertOutcome::Inserted)
        }
    }
}

/// Deletes output rows outside the given outline, where `segment_counts[i]`
/// is the number of segments paragraph `i` will hold.
pub fn prune_output(
    conn: &Connection,
    id: &str,
    segment_counts: &[usize],
) -> Result<usize, DatabaseError> {
    let mut removed = conn.execute(
        "DELETE FROM translation_segments WHERE translation_id = ?1 AND paragraph_idx >= ?2",
        params![id, segment_counts.len() as i64],
    )?;
    removed += conn.execute(
        "DELETE FROM translation_paragraphs WHERE translation_id = ?1 AND paragraph_idx >= ?2",
        params![id, segment_counts.len() as i64],
    )?;
    for (paragraph_idx, count) in segment_counts.iter().enumerate() {
        removed += conn.execute(
            "DELETE FROM translation_segments
             WHERE translation_id = ?1 AND paragraph_idx = ?2 AND seg_idx >= ?3",
            params![id, paragraph_idx as i64, *count as i64],
        )?;
    }
    Ok(removed)
}

/// Loads paragraphs with their segments in (paragraph, segment) order.
pub fn load_output(
    conn: &Connection,
    id: &str,
) -> Result<Vec<(ParagraphRow, Vec<SegmentRow>)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT paragraph_idx, indent, separator FROM translation_paragraphs
         WHERE translation_id = ?1 ORDER BY paragraph_idx ASC",
    )?;
    let paragraphs: Vec<ParagraphRow> = stmt
        .query_map(params![id], |r| {
            Ok(ParagraphRow {
                paragraph_idx: r.get(0)?,
                indent: r.get(1)?,
                separator: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT paragraph_idx, seg_idx, segment_text, pinyin, english FROM translation_segments
         WHERE translation_id = ?1 ORDER BY paragraph_idx ASC, seg_idx ASC",
    )?;
    let segments: Vec<SegmentRow> = stmt
        .query_map(params![id], |r| {
            Ok(SegmentRow {
                paragraph_idx: r.get(0)?,
                seg_idx: r.get(1)?,
                segment_text: r.get(2)?,
                pinyin: r.get(3)?,
                english: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut output: Vec<(ParagraphRow, Vec<SegmentRow>)> =
        paragraphs.into_iter().map(|p| (p, Vec::new())).collect();
    let mut cursor = 0;
    for segment in segments {
        while cursor < output.len() && output[cursor].0.paragraph_idx < segment.paragraph_idx {
            cursor += 1;
        }
        match output.get_mut(cursor) {
            Some((paragraph, list)) if paragraph.paragraph_idx == segment.paragraph_idx => {
                list.push(segment)
            }
            _ => log::warn!(
                "Segment {}:{} of translation {} has no paragraph row",
                segment.paragraph_idx,
                segment.seg_idx,
                id
            ),
        }
    }
    Ok(output)
}
