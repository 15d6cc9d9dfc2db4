//! Progress events for real-time translation streaming.
//!
//! Serialized form is the stream wire contract: a JSON object tagged with
//! `type`, one per SSE frame.

use serde::{Deserialize, Serialize};

use crate::jobs::model::{Paragraph, ParagraphOutline, Segment};

/// Shape of one paragraph in a `start` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParagraphInfo {
    pub segment_count: usize,
    pub indent: String,
    pub separator: String,
}

/// One segment in a `progress` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentResult {
    pub segment: String,
    pub pinyin: String,
    pub english: String,
    /// Segment index within its paragraph.
    pub index: usize,
    pub paragraph_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentTranslation {
    pub segment: String,
    pub pinyin: String,
    pub english: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedParagraph {
    pub translations: Vec<SegmentTranslation>,
    pub indent: String,
    pub separator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Start {
        translation_id: String,
        total: u64,
        paragraphs: Vec<ParagraphInfo>,
    },
    Progress {
        current: u64,
        total: u64,
        result: SegmentResult,
    },
    Complete {
        paragraphs: Vec<CompletedParagraph>,
        #[serde(rename = "fullTranslation")]
        full_translation: String,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn start(job_id: &str, total: u64, outline: &[ParagraphOutline]) -> Self {
        ProgressEvent::Start {
            translation_id: job_id.to_string(),
            total,
            paragraphs: outline
                .iter()
                .map(|p| ParagraphInfo {
                    segment_count: p.segment_count,
                    indent: p.indent.clone(),
                    separator: p.separator.clone(),
                })
                .collect(),
        }
    }

    pub fn progress(current: u64, total: u64, segment: &Segment) -> Self {
        ProgressEvent::Progress {
            current,
            total,
            result: SegmentResult {
                segment: segment.text.clone(),
                pinyin: segment.pinyin.clone(),
                english: segment.english.clone(),
                index: segment.segment_index,
                paragraph_index: segment.paragraph_index,
            },
        }
    }

    pub fn complete(paragraphs: &[Paragraph], full_translation: &str) -> Self {
        ProgressEvent::Complete {
            paragraphs: paragraphs
                .iter()
                .map(|p| CompletedParagraph {
                    translations: p
                        .segments
                        .iter()
                        .map(|s| SegmentTranslation {
                            segment: s.text.clone(),
                            pinyin: s.pinyin.clone(),
                            english: s.english.clone(),
                        })
                        .collect(),
                    indent: p.indent.clone(),
                    separator: p.separator.clone(),
                })
                .collect(),
            full_translation: full_translation.to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            message: message.into(),
        }
    }

    /// `complete` and `error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Complete { .. } | ProgressEvent::Error { .. })
    }

    /// (paragraph, segment) of a `progress` event.
    pub fn segment_key(&self) -> Option<(usize, usize)> {
        match self {
            ProgressEvent::Progress { result, .. } => Some((result.paragraph_index, result.index)),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Start { .. } => "start",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segment() -> Segment {
        Segment {
            paragraph_index: 0,
            segment_index: 1,
            text: "，世界。".to_string(),
            pinyin: "shì jiè".to_string(),
            english: "world".to_string(),
        }
    }

    #[test]
    fn test_start_wire_format() {
        let outline = vec![ParagraphOutline {
            indent: "  ".to_string(),
            separator: "\n".to_string(),
            segment_count: 2,
        }];
        let value = serde_json::to_value(ProgressEvent::start("t1", 2, &outline)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "start",
                "translation_id": "t1",
                "total": 2,
                "paragraphs": [{"segment_count": 2, "indent": "  ", "separator": "\n"}]
            })
        );
    }

    #[test]
    fn test_progress_wire_format() {
        let value = serde_json::to_value(ProgressEvent::progress(2, 2, &segment())).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "progress",
                "current": 2,
                "total": 2,
                "result": {
                    "segment": "，世界。",
                    "pinyin": "shì jiè",
                    "english": "world",
                    "index": 1,
                    "paragraph_index": 0
                }
            })
        );
    }

    #[test]
    fn test_complete_wire_format() {
        let paragraphs = vec![Paragraph {
            index: 0,
            indent: String::new(),
            separator: String::new(),
            segments: vec![segment()],
        }];
        let value = serde_json::to_value(ProgressEvent::complete(&paragraphs, "Hello, world.")).unwrap();
        assert_eq!(value["type"], "complete");
        assert_eq!(value["fullTranslation"], "Hello, world.");
        assert_eq!(value["paragraphs"][0]["translations"][0]["segment"], "，世界。");
        assert_eq!(value["paragraphs"][0]["indent"], "");
    }

    #[test]
    fn test_error_and_terminal() {
        let event = ProgressEvent::error("Translation not found");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "error", "message": "Translation not found"})
        );
        assert!(event.is_terminal());
        assert!(!ProgressEvent::progress(1, 2, &segment()).is_terminal());
        assert_eq!(ProgressEvent::progress(1, 2, &segment()).segment_key(), Some((0, 1)));
    }
}
