//! Server-sent events framing for progress streams.

use futures_util::stream::{Stream, StreamExt};

use crate::broadcast::ProgressEvent;

pub const CONTENT_TYPE: &str = "text/event-stream";

/// Renders one `data: <json>\n\n` frame.
pub fn encode(event: &ProgressEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_default();
    format!("data: {}\n\n", json)
}

/// Parses a single frame produced by [`encode`].
pub fn decode(frame: &str) -> Option<ProgressEvent> {
    let payload = frame.trim_end_matches('\n').strip_prefix("data: ")?;
    serde_json::from_str(payload).ok()
}

/// Maps a stream of events to encoded frames.
pub fn frames<S>(events: S) -> impl Stream<Item = String>
where
    S: Stream<Item = ProgressEvent>,
{
    events.map(|event| encode(&event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[test]
    fn test_encode_error_frame() {
        let frame = encode(&ProgressEvent::error("Translation not found"));
        assert_eq!(
            frame,
            "data: {\"type\":\"error\",\"message\":\"Translation not found\"}\n\n"
        );
        assert_eq!(decode(&frame), Some(ProgressEvent::error("Translation not found")));
    }

    #[test]
    fn test_decode_rejects_other_lines() {
        assert_eq!(decode("event: ping\n\n"), None);
        assert_eq!(decode("data: not json\n\n"), None);
    }

    #[tokio::test]
    async fn test_frames() {
        let out: Vec<String> = frames(stream::iter(vec![ProgressEvent::error("a")]))
            .collect()
            .await;
        assert_eq!(out, vec!["data: {\"type\":\"error\",\"message\":\"a\"}\n\n".to_string()]);
    }
}
