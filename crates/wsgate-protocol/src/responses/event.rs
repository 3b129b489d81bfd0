use serde_json::Value as JsonValue;

/// Classification of one upstream Responses event frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Streaming progress (`response.created`, deltas, item events, ...).
    Progress,
    /// `response.completed`.
    Completed,
    /// `response.failed`, `response.incomplete`, `response.canceled`.
    Failed,
    /// `type=error` frame carrying an error payload.
    Error,
    /// `type=error` whose code marks the `previous_response_id` as unknown
    /// upstream.
    ContinuationUnavailable,
}

impl EventKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventKind::Progress)
    }
}

/// What the turn engine needs to know about one upstream frame.
#[derive(Debug, Clone, Default)]
pub struct UpstreamEventMeta {
    pub event_type: Option<String>,
    pub kind: Option<EventKind>,
    /// Present on `response.completed`.
    pub response_id: Option<String>,
}

impl UpstreamEventMeta {
    pub fn is_terminal(&self) -> bool {
        self.kind.map(|kind| kind.is_terminal()).unwrap_or(false)
    }
}

/// Inspect one upstream text frame without interpreting its payload. Frames
/// that do not parse are relayed as-is and treated as progress.
pub fn inspect_event(json_text: &str) -> UpstreamEventMeta {
    let mut meta = UpstreamEventMeta::default();
    let Ok(value) = serde_json::from_str::<JsonValue>(json_text) else {
        return meta;
    };
    let Some(event_type) = value.get("type").and_then(|t| t.as_str()) else {
        return meta;
    };
    meta.event_type = Some(event_type.to_string());

    meta.kind = Some(match event_type {
        "response.completed" => {
            meta.response_id = value
                .get("response")
                .and_then(|r| r.get("id"))
                .and_then(|id| id.as_str())
                .map(|id| id.to_string());
            EventKind::Completed
        }
        "response.failed" | "response.incomplete" | "response.canceled"
        | "response.cancelled" => EventKind::Failed,
        "error" => {
            if is_continuation_unavailable(&value) {
                EventKind::ContinuationUnavailable
            } else {
                EventKind::Error
            }
        }
        _ => EventKind::Progress,
    });
    meta
}

fn is_continuation_unavailable(value: &JsonValue) -> bool {
    let error = value.get("error").unwrap_or(value);
    if let Some(code) = error.get("code").and_then(|c| c.as_str())
        && (code == "continuation_unavailable" || code == "previous_response_not_found")
    {
        return true;
    }
    error
        .get("message")
        .and_then(|m| m.as_str())
        .is_some_and(|message| message.to_ascii_lowercase().contains("previous response"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_extracts_response_id() {
        let meta = inspect_event(
            r#"{"type":"response.completed","response":{"id":"resp_1","output":[]}}"#,
        );
        assert_eq!(meta.kind, Some(EventKind::Completed));
        assert!(meta.is_terminal());
        assert_eq!(meta.response_id.as_deref(), Some("resp_1"));
    }

    #[test]
    fn deltas_are_progress() {
        let meta = inspect_event(r#"{"type":"response.output_text.delta","delta":"hi"}"#);
        assert_eq!(meta.kind, Some(EventKind::Progress));
        assert!(!meta.is_terminal());
    }

    #[test]
    fn error_event_is_terminal() {
        let meta = inspect_event(r#"{"type":"error","error":{"code":"server_error","message":"boom"}}"#);
        assert_eq!(meta.kind, Some(EventKind::Error));
        assert!(meta.is_terminal());
    }

    #[test]
    fn continuation_unavailable_by_code() {
        let meta = inspect_event(r#"{"type":"error","code":"continuation_unavailable"}"#);
        assert_eq!(meta.kind, Some(EventKind::ContinuationUnavailable));

        let meta = inspect_event(
            r#"{"type":"error","error":{"code":"invalid_request_error","message":"Previous response with id 'r1' not found."}}"#,
        );
        assert_eq!(meta.kind, Some(EventKind::ContinuationUnavailable));
    }

    #[test]
    fn garbage_is_relayed_as_progress() {
        let meta = inspect_event("not json");
        assert!(meta.kind.is_none());
        assert!(!meta.is_terminal());
    }
}
