//! Downstream stream events.

use futures_util::stream::BoxStream;
use serde_json::json;

/// One element of a relayed stream.
///
/// Zero or more `Text`/`Warning` events are followed by exactly one terminal
/// event (`Done` or `Error`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Text(String),
    Warning(String),
    Error(String),
    Done,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Text(_) => "text",
            StreamEvent::Warning(_) => "warning",
            StreamEvent::Error(_) => "error",
            StreamEvent::Done => "done",
        }
    }

    /// JSON payload of the downstream frame (without the `data: ` marker).
    pub fn to_json(&self) -> String {
        let value = match self {
            StreamEvent::Text(text) => json!({ "text": text }),
            StreamEvent::Warning(reason) => json!({ "warning": reason }),
            StreamEvent::Error(message) => json!({ "error": message }),
            StreamEvent::Done => json!({ "done": true }),
        };
        value.to_string()
    }

    /// Complete SSE frame, `data: {...}\n\n`.
    pub fn to_sse_data(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }
}

/// Lazily produced events of one streaming call.
pub type EventStream = BoxStream<'static, StreamEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames() {
        assert_eq!(StreamEvent::Text("Hi".into()).to_sse_data(), "data: {\"text\":\"Hi\"}\n\n");
        assert_eq!(StreamEvent::Done.to_json(), r#"{"done":true}"#);
        assert_eq!(
            StreamEvent::Warning("SAFETY".into()).to_json(),
            r#"{"warning":"SAFETY"}"#
        );
        assert!(StreamEvent::Error("x".into()).is_terminal());
        assert!(!StreamEvent::Warning("x".into()).is_terminal());
    }
}
