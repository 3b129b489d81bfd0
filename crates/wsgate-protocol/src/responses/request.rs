use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Text, image, or file inputs to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputParam {
    Text(String),
    Items(Vec<InputItem>),
}

/// One entry of an `input` array. Only the fields the gateway routes on are
/// typed; everything else rides along in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputItem {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<JsonValue>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// The gateway's view of a Responses create request.
///
/// Relays must stay verbatim, so unknown fields are preserved through
/// `extra` and the body round-trips through serde unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    /// Model ID used to generate the response.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_cache_key: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl ResponsesRequest {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// A pristine turn is self-contained; a continuation depends on a prior
    /// response surviving upstream.
    pub fn is_pristine(&self) -> bool {
        self.previous_response_id.is_none()
    }

    /// Whether the input references prior state (`function_call_output` or
    /// `item_reference` items).
    pub fn has_continuation_input(&self) -> bool {
        let Some(InputParam::Items(items)) = &self.input else {
            return false;
        };
        items.iter().any(|item| {
            matches!(
                item.item_type.as_deref(),
                Some("function_call_output") | Some("item_reference")
            )
        })
    }

    /// First user-authored text, used to derive the session hash.
    pub fn first_user_text(&self) -> Option<String> {
        match &self.input {
            Some(InputParam::Text(text)) => Some(text.clone()),
            Some(InputParam::Items(items)) => items
                .iter()
                .find(|item| item.role.as_deref() == Some("user"))
                .and_then(|item| item.content.as_ref())
                .map(content_text),
            None => None,
        }
    }

    /// The message sent on the upstream socket: the create body wrapped as a
    /// `response.create` event. `stream` and `background` are
    /// transport-specific and stripped; WebSocket mode is inherently
    /// streaming.
    pub fn to_upstream_message(&self) -> Result<String, serde_json::Error> {
        let JsonValue::Object(mut body) = serde_json::to_value(self)? else {
            unreachable!("ResponsesRequest serializes to an object");
        };
        body.remove("stream");
        body.remove("background");
        body.remove("type");

        let mut out = Map::with_capacity(body.len() + 1);
        out.insert(
            "type".to_string(),
            JsonValue::String("response.create".to_string()),
        );
        for (key, value) in body {
            out.insert(key, value);
        }
        serde_json::to_string(&JsonValue::Object(out))
    }

    /// Rewrite the turn as a full create: no `previous_response_id`, the
    /// cached full input carried inline.
    pub fn degrade_to_full_create(&self) -> Self {
        let mut degraded = self.clone();
        degraded.previous_response_id = None;
        degraded
    }
}

fn content_text(content: &JsonValue) -> String {
    match content {
        JsonValue::String(text) => text.clone(),
        JsonValue::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_round_trip() {
        let raw = r#"{"model":"gpt-5.2","input":"hi","store":false,"reasoning":{"effort":"high"},"tools":[{"type":"function","name":"ls"}]}"#;
        let parsed = ResponsesRequest::parse(raw).unwrap();
        assert_eq!(parsed.model, "gpt-5.2");
        assert_eq!(parsed.store, Some(false));
        assert!(parsed.extra.contains_key("reasoning"));
        assert!(parsed.extra.contains_key("tools"));

        let back: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&parsed).unwrap()).unwrap();
        let original: serde_json::Value = serde_json::from_str(raw).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn detects_continuation_input() {
        let raw = r#"{"model":"gpt-5.2","input":[{"type":"function_call_output","call_id":"c1","output":"ok"}]}"#;
        let parsed = ResponsesRequest::parse(raw).unwrap();
        assert!(parsed.has_continuation_input());

        let raw = r#"{"model":"gpt-5.2","input":[{"type":"message","role":"user","content":"hi"}]}"#;
        let parsed = ResponsesRequest::parse(raw).unwrap();
        assert!(!parsed.has_continuation_input());
    }

    #[test]
    fn upstream_message_wraps_and_strips_stream() {
        let raw = r#"{"model":"gpt-5.2","input":"hi","stream":true}"#;
        let parsed = ResponsesRequest::parse(raw).unwrap();
        let msg: serde_json::Value =
            serde_json::from_str(&parsed.to_upstream_message().unwrap()).unwrap();
        assert_eq!(msg["type"], "response.create");
        assert_eq!(msg["model"], "gpt-5.2");
        assert!(msg.get("stream").is_none());
    }

    #[test]
    fn degrade_strips_previous_response_id_only() {
        let raw = r#"{"model":"gpt-5.2","previous_response_id":"r1","input":[{"type":"message","role":"user","content":"go on"}]}"#;
        let degraded = ResponsesRequest::parse(raw).unwrap().degrade_to_full_create();
        assert!(degraded.previous_response_id.is_none());
        assert!(matches!(degraded.input, Some(InputParam::Items(ref items)) if items.len() == 1));
    }

    #[test]
    fn first_user_text_from_parts() {
        let raw = r#"{"model":"m","input":[{"type":"message","role":"user","content":[{"type":"input_text","text":"hello"},{"type":"input_text","text":"world"}]}]}"#;
        let parsed = ResponsesRequest::parse(raw).unwrap();
        assert_eq!(parsed.first_user_text().as_deref(), Some("hello\nworld"));
    }
}
