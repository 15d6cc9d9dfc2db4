//! Domain types for translation jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::chat_repo::ChatMessageRow;
use crate::db::lease_repo::LeaseRow;
use crate::db::translation_repo::{ParagraphRow, SegmentRow, TranslationRow};
use crate::db::DatabaseError;

pub type JobId = String;

// ─── State ──────────────────────────────────────────────────────────────────

/// Lifecycle state shared by a job and its lease.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Parses a stored state, falling back to `Pending` for unknown values.
    pub fn parse(s: &str, job_id: &str) -> Self {
        match s {
            "pending" => JobState::Pending,
            "processing" => JobState::Processing,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            other => {
                log::warn!(
                    "Unknown state '{}' for translation {}, defaulting to pending",
                    other,
                    job_id
                );
                JobState::Pending
            }
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the submitted text came from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Text,
    Ocr,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Text => "text",
            SourceKind::Ocr => "ocr",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "ocr" => SourceKind::Ocr,
            _ => SourceKind::Text,
        }
    }
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

// ─── Output ─────────────────────────────────────────────────────────────────

/// Shape of one paragraph as announced by the provider before segments flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParagraphOutline {
    pub indent: String,
    pub separator: String,
    pub segment_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Segment {
    pub paragraph_index: usize,
    pub segment_index: usize,
    pub text: String,
    pub pinyin: String,
    pub english: String,
}

impl From<SegmentRow> for Segment {
    fn from(row: SegmentRow) -> Self {
        Self {
            paragraph_index: row.paragraph_idx as usize,
            segment_index: row.seg_idx as usize,
            text: row.segment_text,
            pinyin: row.pinyin,
            english: row.english,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Paragraph {
    pub index: usize,
    pub indent: String,
    pub separator: String,
    pub segments: Vec<Segment>,
}

impl Paragraph {
    pub(crate) fn from_rows(paragraph: ParagraphRow, segments: Vec<SegmentRow>) -> Self {
        Self {
            index: paragraph.paragraph_idx as usize,
            indent: paragraph.indent,
            separator: paragraph.separator,
            segments: segments.into_iter().map(Segment::from).collect(),
        }
    }
}

/// Rebuilds the source text as `indent + segments + separator` per paragraph.
pub fn reconstruct(paragraphs: &[Paragraph]) -> String {
    let mut out = String::new();
    for paragraph in paragraphs {
        out.push_str(&paragraph.indent);
        for segment in &paragraph.segments {
            out.push_str(&segment.text);
        }
        out.push_str(&paragraph.separator);
    }
    out
}

/// Space-joined glosses, used when the provider gives no full translation.
pub fn joined_glosses(paragraphs: &[Paragraph]) -> String {
    paragraphs
        .iter()
        .flat_map(|p| p.segments.iter())
        .map(|s| s.english.trim())
        .filter(|e| !e.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ─── Job ────────────────────────────────────────────────────────────────────

/// A translation job with its persisted output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub source_kind: SourceKind,
    pub input_text: String,
    pub state: JobState,
    /// Segments persisted so far.
    pub progress: u64,
    /// Segments expected; 0 until the provider reports counts.
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_translation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paragraphs: Vec<Paragraph>,
}

impl Job {
    pub(crate) fn from_rows(row: TranslationRow, paragraphs: Vec<Paragraph>) -> Self {
        Self {
            state: JobState::parse(&row.status, &row.id),
            source_kind: SourceKind::parse(&row.source_kind),
            progress: row.progress.max(0) as u64,
            total: row.total.max(0) as u64,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
            id: row.id,
            input_text: row.input_text,
            full_translation: row.full_translation,
            error: row.error_message,
            paragraphs,
        }
    }
}

/// One entry of a job listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub preview: String,
    pub source_kind: SourceKind,
    pub state: JobState,
    pub progress: u64,
    pub total: u64,
    pub created_at: DateTime<Utc>,
}

impl From<TranslationRow> for JobSummary {
    fn from(row: TranslationRow) -> Self {
        Self {
            preview: crate::sanitize::preview(&row.input_text, crate::sanitize::PREVIEW_CHARS),
            state: JobState::parse(&row.status, &row.id),
            source_kind: SourceKind::parse(&row.source_kind),
            progress: row.progress.max(0) as u64,
            total: row.total.max(0) as u64,
            created_at: parse_timestamp(&row.created_at),
            id: row.id,
        }
    }
}

/// Progress snapshot of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    pub progress: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TranslationRow> for JobStatus {
    fn from(row: &TranslationRow) -> Self {
        Self {
            id: row.id.clone(),
            state: JobState::parse(&row.status, &row.id),
            progress: row.progress.max(0) as u64,
            total: row.total.max(0) as u64,
            error: row.error_message.clone(),
        }
    }
}

/// Listing filter. `limit` defaults to 20.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPage {
    pub items: Vec<JobSummary>,
    pub total: u64,
}

/// Result of an idempotent append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// False when the row already held identical content.
    pub changed: bool,
    pub progress: u64,
    pub total: u64,
}

// ─── Lease ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub job_id: JobId,
    pub state: JobState,
    pub token: Option<String>,
    pub attempts: u32,
    pub lease_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl From<LeaseRow> for Lease {
    fn from(row: LeaseRow) -> Self {
        Self {
            state: JobState::parse(&row.state, &row.translation_id),
            attempts: row.attempts.max(0) as u32,
            lease_until: row.lease_until.as_deref().map(parse_timestamp),
            heartbeat_at: row.heartbeat_at.as_deref().map(parse_timestamp),
            job_id: row.translation_id,
            token: row.worker_token,
            last_error: row.last_error,
        }
    }
}

// ─── Chat ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub job_id: JobId,
    pub role: ChatRole,
    pub content: String,
    pub selected_segment_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ChatMessageRow> for ChatMessage {
    type Error = DatabaseError;

    fn try_from(row: ChatMessageRow) -> Result<Self, Self::Error> {
        let selected_segment_ids: Vec<String> = serde_json::from_str(&row.selected_segment_ids)
            .map_err(|source| DatabaseError::Json {
                column: "selected_segment_ids",
                source,
            })?;
        let role = match row.role.as_str() {
            "assistant" => ChatRole::Assistant,
            _ => ChatRole::User,
        };
        Ok(Self {
            id: row.id,
            job_id: row.translation_id,
            role,
            content: row.content,
            selected_segment_ids,
            created_at: parse_timestamp(&row.created_at),
        })
    }
}
