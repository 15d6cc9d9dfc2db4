//! Translation jobs: domain model, persistent store and lease management.

pub mod lease;
pub mod model;
pub mod store;

pub use lease::{AcquireOutcome, LeaseManager};
pub use model::{
    ChatMessage, ChatRole, Job, JobFilter, JobId, JobPage, JobState, JobStatus, JobSummary, Lease,
    Paragraph, ParagraphOutline, Segment, SourceKind,
};
pub use store::JobStore;
