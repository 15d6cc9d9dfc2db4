//! Segmenter/translator providers.
//!
//! A provider turns source text into a lazy stream of items: first the
//! paragraph outline, then one item per segment in (paragraph, segment)
//! order, and optionally a full translation. The worker drives the stream
//! one item at a time and may stop pulling at any point.

use std::path::PathBuf;

use thiserror::Error;

use crate::error::JobError;

pub mod dictionary;
pub mod pinyin;
pub mod text;

pub use crate::jobs::model::{ParagraphOutline, Segment as SegmentOutput};
pub use dictionary::{Dictionary, DictionaryTranslator};

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Timeout, rate limit or temporarily unavailable upstream.
    #[error("Provider unavailable: {0}")]
    Transient(String),

    /// Output that could not be interpreted; another attempt may succeed.
    #[error("Malformed provider output: {0}")]
    Malformed(String),

    /// Output that can never become a valid translation.
    #[error("Unusable provider output: {0}")]
    Structural(String),

    #[error("Failed to read dictionary '{path}': {source}")]
    Dictionary {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<ProviderError> for JobError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Structural(msg) => JobError::UpstreamStructural(msg),
            other => JobError::UpstreamTransient(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderItem {
    Outline(Vec<ParagraphOutline>),
    Segment(SegmentOutput),
    FullTranslation(String),
}

/// Lazy, finite, non-restartable stream of provider items.
pub type TranslationStream = Box<dyn Iterator<Item = Result<ProviderItem, ProviderError>> + Send>;

/// A fully collected provider response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationOutput {
    pub outline: Vec<ParagraphOutline>,
    pub segments: Vec<SegmentOutput>,
    pub full_translation: Option<String>,
}

pub trait Translator: Send + Sync {
    /// Starts translating `text`. Errors returned here happen before any
    /// item was produced.
    fn translate(&self, text: &str) -> Result<TranslationStream, ProviderError>;

    /// Collects the whole stream.
    fn translate_batch(&self, text: &str) -> Result<TranslationOutput, ProviderError> {
        let mut output = TranslationOutput::default();
        for item in self.translate(text)? {
            match item? {
                ProviderItem::Outline(outline) => output.outline = outline,
                ProviderItem::Segment(segment) => output.segments.push(segment),
                ProviderItem::FullTranslation(full) => output.full_translation = Some(full),
            }
        }
        Ok(output)
    }
}
