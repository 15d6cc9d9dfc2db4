//! Job store with persistent database storage.
//!
//! The store is the source of truth for a job and its output. Multi-row
//! changes run inside one transaction so a crash never leaves a job with
//! half-applied progress.

use rusqlite::Connection;

use crate::db::translation_repo::{
    self, ParagraphRow, SegmentRow, TranslationFilter, TranslationRow, UpsertOutcome,
};
use crate::db::{chat_repo, lease_repo, now_timestamp, Database};
use crate::error::JobError;
use crate::jobs::model::{
    AppendOutcome, ChatMessage, ChatRole, Job, JobFilter, JobId, JobPage, JobState, JobStatus,
    JobSummary, Paragraph, ParagraphOutline, Segment, SourceKind,
};
use crate::sanitize;

/// Persistent store for translation jobs.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

/// Fails with `NotFound` unless the translation row exists.
fn require_job(conn: &Connection, id: &str) -> Result<(), JobError> {
    if translation_repo::exists(conn, id)? {
        Ok(())
    } else {
        Err(JobError::NotFound(id.to_string()))
    }
}

/// Fails unless the translation exists and `token` holds its lease.
fn require_lease(conn: &Connection, id: &str, token: &str) -> Result<(), JobError> {
    require_job(conn, id)?;
    if lease_repo::is_held(conn, id, token)? {
        Ok(())
    } else {
        Err(JobError::LeaseLost(id.to_string()))
    }
}

/// Explains why a guarded state update touched no rows.
fn transition_error(conn: &Connection, id: &str, to: &'static str) -> JobError {
    match translation_repo::status_of(conn, id) {
        Ok(Some(from)) => JobError::Conflict {
            id: id.to_string(),
            from,
            to,
        },
        Ok(None) => JobError::NotFound(id.to_string()),
        Err(e) => JobError::Database(e),
    }
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates a `pending` job and its lease row.
    pub fn create_job(&self, text: &str, source_kind: SourceKind) -> Result<JobId, JobError> {
        if text.trim().is_empty() {
            return Err(JobError::InvalidInput("text is empty".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();
        let row = TranslationRow {
            id: id.clone(),
            source_kind: source_kind.as_str().to_string(),
            input_text: text.to_string(),
            status: JobState::Pending.as_str().to_string(),
            progress: 0,
            total: 0,
            full_translation: None,
            error_message: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        };

        self.db.with_tx(|tx| -> Result<(), JobError> {
            translation_repo::insert(tx, &row)?;
            lease_repo::insert_pending(tx, &id, &now)?;
            Ok(())
        })?;

        log::info!(
            "Created translation {} ({} chars, hash {})",
            id,
            text.chars().count(),
            sanitize::hash_text(text)
        );
        Ok(id)
    }

    /// Loads a job with its paragraphs and segments.
    pub fn get_job(&self, id: &str) -> Result<Job, JobError> {
        self.db.with_tx(|tx| -> Result<Job, JobError> {
            let row = translation_repo::find_by_id(tx, id)?
                .ok_or_else(|| JobError::NotFound(id.to_string()))?;
            let paragraphs = load_paragraphs(tx, id)?;
            Ok(Job::from_rows(row, paragraphs))
        })
    }

    /// Lists jobs newest first.
    pub fn list_jobs(&self, limit: u64, offset: u64) -> Result<Vec<JobSummary>, JobError> {
        let page = self.list_jobs_filtered(&JobFilter {
            state: None,
            limit: Some(limit),
            offset: Some(offset),
        })?;
        Ok(page.items)
    }

    /// Lists jobs newest first with an optional state filter and the
    /// total count of matching jobs.
    pub fn list_jobs_filtered(&self, filter: &JobFilter) -> Result<JobPage, JobError> {
        let filter = TranslationFilter {
            status: filter.state.map(|s| s.as_str().to_string()),
            limit: filter.limit,
            offset: filter.offset,
        };
        let (rows, total) = self
            .db
            .with_conn(|conn| translation_repo::query(conn, &filter))?;
        Ok(JobPage {
            items: rows.into_iter().map(JobSummary::from).collect(),
            total,
        })
    }

    pub fn job_status(&self, id: &str) -> Result<JobStatus, JobError> {
        let row = self
            .db
            .with_conn(|conn| translation_repo::find_by_id(conn, id))?
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        Ok(JobStatus::from(&row))
    }

    pub fn exists(&self, id: &str) -> Result<bool, JobError> {
        Ok(self.db.with_conn(|conn| translation_repo::exists(conn, id))?)
    }

    /// Records the provider's paragraph outline, sets `total` and drops
    /// rows from an earlier attempt that fall outside the outline.
    /// Returns the new total.
    pub fn begin_output(
        &self,
        id: &str,
        token: &str,
        outline: &[ParagraphOutline],
    ) -> Result<u64, JobError> {
        let now = now_timestamp();
        self.db.with_tx(|tx| -> Result<u64, JobError> {
            require_lease(tx, id, token)?;
            for (index, paragraph) in outline.iter().enumerate() {
                translation_repo::upsert_paragraph(
                    tx,
                    id,
                    &ParagraphRow {
                        paragraph_idx: index as i64,
                        indent: paragraph.indent.clone(),
                        separator: paragraph.separator.clone(),
                    },
                )?;
            }
            let counts: Vec<usize> = outline.iter().map(|p| p.segment_count).collect();
            let removed = translation_repo::prune_output(tx, id, &counts)?;
            if removed > 0 {
                log::info!("Pruned {} stale output rows of translation {}", removed, id);
            }
            let total: usize = counts.iter().sum();
            translation_repo::set_total(tx, id, total as i64, &now)?;
            let (_, total) = translation_repo::refresh_progress(tx, id, &now)?;
            Ok(total.max(0) as u64)
        })
    }

    /// Idempotent upsert of a paragraph. Returns whether anything changed.
    pub fn append_paragraph(
        &self,
        id: &str,
        token: &str,
        index: usize,
        indent: &str,
        separator: &str,
    ) -> Result<bool, JobError> {
        self.db.with_tx(|tx| -> Result<bool, JobError> {
            require_lease(tx, id, token)?;
            let outcome = translation_repo::upsert_paragraph(
                tx,
                id,
                &ParagraphRow {
                    paragraph_idx: index as i64,
                    indent: indent.to_string(),
                    separator: separator.to_string(),
                },
            )?;
            Ok(outcome != UpsertOutcome::Unchanged)
        })
    }

    /// Idempotent upsert of a segment keyed by (paragraph, segment).
    /// Progress is recomputed from the persisted row count.
    pub fn append_segment(
        &self,
        id: &str,
        token: &str,
        segment: &Segment,
    ) -> Result<AppendOutcome, JobError> {
        let now = now_timestamp();
        self.db.with_tx(|tx| -> Result<AppendOutcome, JobError> {
            require_lease(tx, id, token)?;
            let paragraph_idx = segment.paragraph_index as i64;
            translation_repo::ensure_paragraph(tx, id, paragraph_idx)?;
            let outcome = translation_repo::upsert_segment(
                tx,
                id,
                &SegmentRow {
                    paragraph_idx,
                    seg_idx: segment.segment_index as i64,
                    segment_text: segment.text.clone(),
                    pinyin: segment.pinyin.clone(),
                    english: segment.english.clone(),
                },
                &now,
            )?;
            let (progress, total) = translation_repo::refresh_progress(tx, id, &now)?;
            Ok(AppendOutcome {
                changed: outcome != UpsertOutcome::Unchanged,
                progress: progress.max(0) as u64,
                total: total.max(0) as u64,
            })
        })
    }

    /// `processing → completed`, releasing the lease in the same transaction.
    pub fn complete_job(
        &self,
        id: &str,
        token: &str,
        full_translation: &str,
    ) -> Result<(), JobError> {
        let now = now_timestamp();
        self.db.with_tx(|tx| -> Result<(), JobError> {
            require_lease(tx, id, token)?;
            if translation_repo::mark_completed(tx, id, full_translation, &now)? == 0 {
                return Err(transition_error(tx, id, "completed"));
            }
            lease_repo::release(tx, id, token, JobState::Completed.as_str(), None, &now)?;
            Ok(())
        })?;
        log::info!("Translation {} completed", id);
        Ok(())
    }

    /// Marks a job failed and closes its lease. Persisted segments are kept.
    pub fn fail_job(&self, id: &str, token: &str, message: &str) -> Result<(), JobError> {
        let now = now_timestamp();
        let message = sanitize::truncate_message(message);
        self.db.with_tx(|tx| -> Result<(), JobError> {
            require_lease(tx, id, token)?;
            if translation_repo::mark_failed(tx, id, &message, &now)? == 0 {
                return Err(transition_error(tx, id, "failed"));
            }
            lease_repo::release(
                tx,
                id,
                token,
                JobState::Failed.as_str(),
                Some(message.as_str()),
                &now,
            )?;
            Ok(())
        })?;
        log::warn!("Translation {} failed: {}", id, message);
        Ok(())
    }

    /// Returns a job to `pending` after a transient failure and hands the
    /// lease back to the queue.
    pub fn requeue_job(&self, id: &str, token: &str, message: &str) -> Result<(), JobError> {
        let now = now_timestamp();
        let message = sanitize::truncate_message(message);
        self.db.with_tx(|tx| -> Result<(), JobError> {
            require_lease(tx, id, token)?;
            if translation_repo::mark_pending(tx, id, &message, &now)? == 0 {
                return Err(transition_error(tx, id, "pending"));
            }
            lease_repo::release(
                tx,
                id,
                token,
                JobState::Pending.as_str(),
                Some(message.as_str()),
                &now,
            )?;
            Ok(())
        })
    }

    /// Deletes a job and everything attached to it.
    pub fn delete_job(&self, id: &str) -> Result<bool, JobError> {
        let removed = self.db.with_conn(|conn| translation_repo::delete(conn, id))?;
        if removed {
            log::info!("Deleted translation {}", id);
        }
        Ok(removed)
    }

    /// Ordered paragraphs with their segments.
    pub fn paragraphs(&self, id: &str) -> Result<Vec<Paragraph>, JobError> {
        self.db.with_tx(|tx| -> Result<Vec<Paragraph>, JobError> {
            require_job(tx, id)?;
            load_paragraphs(tx, id)
        })
    }

    pub fn append_chat_message(
        &self,
        id: &str,
        role: ChatRole,
        content: &str,
        selected_segment_ids: &[String],
    ) -> Result<ChatMessage, JobError> {
        let selected = serde_json::to_string(selected_segment_ids).map_err(|source| {
            crate::db::DatabaseError::Json {
                column: "selected_segment_ids",
                source,
            }
        })?;
        let row = chat_repo::ChatMessageRow {
            id: uuid::Uuid::new_v4().to_string(),
            translation_id: id.to_string(),
            role: role.as_str().to_string(),
            content: content.to_string(),
            selected_segment_ids: selected,
            created_at: now_timestamp(),
        };
        self.db.with_tx(|tx| -> Result<(), JobError> {
            require_job(tx, id)?;
            chat_repo::insert(tx, &row)?;
            Ok(())
        })?;
        Ok(ChatMessage::try_from(row)?)
    }

    pub fn list_chat_messages(&self, id: &str) -> Result<Vec<ChatMessage>, JobError> {
        let rows = self.db.with_tx(|tx| -> Result<_, JobError> {
            require_job(tx, id)?;
            Ok(chat_repo::list_for_translation(tx, id)?)
        })?;
        rows.into_iter()
            .map(|row| ChatMessage::try_from(row).map_err(JobError::from))
            .collect()
    }

    pub fn clear_chat_messages(&self, id: &str) -> Result<usize, JobError> {
        Ok(self
            .db
            .with_conn(|conn| chat_repo::delete_for_translation(conn, id))?)
    }
}

fn load_paragraphs(conn: &Connection, id: &str) -> Result<Vec<Paragraph>, JobError> {
    let output = translation_repo::load_output(conn, id)?;
    Ok(output
        .into_iter()
        .map(|(paragraph, segments)| Paragraph::from_rows(paragraph, segments))
        .collect())
}
