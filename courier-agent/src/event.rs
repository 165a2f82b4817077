// ABOUTME: Event types emitted by worker processes inside framed output.
// ABOUTME: Validates the loosely-typed worker JSON into a Success/Error tagged enum.

use serde::{Deserialize, Serialize};

/// What kind of content a streamed event carries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Model reasoning, usually not shown to users
    Thinking,
    /// User-facing text
    Text,
    /// Tool invocation progress
    Tool,
}

/// One event parsed from a worker's framed output.
///
/// The worker writes `{"status": "success" | "error", ...}`; anything that does
/// not fit one of these two shapes is rejected at the framing boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WorkerOutputEvent {
    /// The worker produced (possibly partial) output
    #[serde(rename_all = "camelCase")]
    Success {
        /// Result text, or null when the event only carries metadata
        #[serde(default)]
        result: Option<String>,
        /// Continuation token for the next invocation
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_session_id: Option<String>,
        /// Whether more output for the same turn follows
        #[serde(default)]
        is_partial: bool,
        /// Content kind for streamed chunks
        #[serde(default, rename = "streamType", skip_serializing_if = "Option::is_none")]
        stream_kind: Option<StreamKind>,
    },

    /// The worker reported a failure
    #[serde(rename_all = "camelCase")]
    Error {
        /// Diagnostic text from the worker
        #[serde(default)]
        error: Option<String>,
        /// Any result text emitted alongside the error
        #[serde(default)]
        result: Option<String>,
        /// Continuation token, workers may still hand one back on error
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_session_id: Option<String>,
        #[serde(default)]
        is_partial: bool,
        #[serde(default, rename = "streamType", skip_serializing_if = "Option::is_none")]
        stream_kind: Option<StreamKind>,
    },
}

impl WorkerOutputEvent {
    /// Convenience constructor for a final text result
    pub fn success(result: impl Into<String>) -> Self {
        Self::Success {
            result: Some(result.into()),
            new_session_id: None,
            is_partial: false,
            stream_kind: None,
        }
    }

    /// Convenience constructor for an error event
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: Some(message.into()),
            result: None,
            new_session_id: None,
            is_partial: false,
            stream_kind: None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Result text carried by this event, if any
    pub fn result(&self) -> Option<&str> {
        match self {
            Self::Success { result, .. } | Self::Error { result, .. } => result.as_deref(),
        }
    }

    pub fn new_session_id(&self) -> Option<&str> {
        match self {
            Self::Success { new_session_id, .. } | Self::Error { new_session_id, .. } => {
                new_session_id.as_deref()
            }
        }
    }

    /// Error text for error events, with a generic fallback
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Error { error, .. } => Some(
                error
                    .clone()
                    .unwrap_or_else(|| "worker reported an error without details".to_string()),
            ),
            Self::Success { .. } => None,
        }
    }

    /// Stream kind declared by the worker, if any
    pub fn stream_kind(&self) -> Option<StreamKind> {
        match self {
            Self::Success { stream_kind, .. } | Self::Error { stream_kind, .. } => *stream_kind,
        }
    }

    pub fn is_partial(&self) -> bool {
        match self {
            Self::Success { is_partial, .. } | Self::Error { is_partial, .. } => *is_partial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success_with_all_fields() {
        let json = r#"{"status":"success","result":"hi","newSessionId":"s-1","isPartial":true,"streamType":"text"}"#;
        let event: WorkerOutputEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            WorkerOutputEvent::Success {
                result: Some("hi".to_string()),
                new_session_id: Some("s-1".to_string()),
                is_partial: true,
                stream_kind: Some(StreamKind::Text),
            }
        );
        assert_eq!(event.new_session_id(), Some("s-1"));
    }

    #[test]
    fn test_parse_success_null_result() {
        let event: WorkerOutputEvent =
            serde_json::from_str(r#"{"status":"success","result":null}"#).unwrap();
        assert_eq!(event.result(), None);
        assert!(!event.is_error());
    }

    #[test]
    fn test_parse_error_event() {
        let event: WorkerOutputEvent =
            serde_json::from_str(r#"{"status":"error","result":null,"error":"boom"}"#).unwrap();
        assert!(event.is_error());
        assert_eq!(event.error_message().as_deref(), Some("boom"));
    }

    #[test]
    fn test_error_event_keeps_stream_fields() {
        let json = r#"{"status":"error","error":"cut off","result":"half a thought","isPartial":true,"streamType":"thinking"}"#;
        let event: WorkerOutputEvent = serde_json::from_str(json).unwrap();
        assert!(event.is_error());
        assert!(event.is_partial());
        assert_eq!(event.stream_kind(), Some(StreamKind::Thinking));
        assert_eq!(event.result(), Some("half a thought"));
    }

    #[test]
    fn test_error_without_details_has_fallback_message() {
        let event: WorkerOutputEvent = serde_json::from_str(r#"{"status":"error"}"#).unwrap();
        assert!(event.error_message().unwrap().contains("without details"));
    }

    #[test]
    fn test_rejects_unknown_status() {
        let parsed = serde_json::from_str::<WorkerOutputEvent>(r#"{"status":"maybe"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_rejects_non_string_result() {
        let parsed =
            serde_json::from_str::<WorkerOutputEvent>(r#"{"status":"success","result":{"a":1}}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_serializes_with_worker_field_names() {
        let event = WorkerOutputEvent::Success {
            result: Some("x".to_string()),
            new_session_id: Some("abc".to_string()),
            is_partial: false,
            stream_kind: Some(StreamKind::Tool),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["newSessionId"], "abc");
        assert_eq!(value["streamType"], "tool");
    }
}
