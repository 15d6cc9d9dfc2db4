//! Broadcasting of translation progress to stream subscribers.
//!
//! The bus is a cache for live continuity only; the job store stays the
//! source of truth.

pub mod bus;
pub mod job_progress;

pub use bus::{BusSettings, ProgressBus, Subscription, SubscriptionError};
pub use job_progress::{
    CompletedParagraph, ParagraphInfo, ProgressEvent, SegmentResult, SegmentTranslation,
};
