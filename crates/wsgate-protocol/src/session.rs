use serde::{Deserialize, Serialize};

use crate::responses::request::ResponsesRequest;

/// Stable identity of a client-side conversation, derived from the first
/// turn: model plus a digest of the first user message. Later turns of the
/// same client connection reuse the binding instead of recomputing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHash(String);

impl SessionHash {
    pub fn from_first_turn(request: &ResponsesRequest) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(request.model.as_bytes());
        hasher.update(b"\x00");
        if let Some(text) = request.first_user_text() {
            hasher.update(blake3::hash(text.as_bytes()).as_bytes());
        }
        Self(hasher.finalize().to_hex().as_str()[..32].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(raw: &str) -> ResponsesRequest {
        ResponsesRequest::parse(raw).unwrap()
    }

    #[test]
    fn same_first_turn_same_hash() {
        let a = SessionHash::from_first_turn(&request(r#"{"model":"gpt-5.2","input":"hi"}"#));
        let b = SessionHash::from_first_turn(&request(r#"{"model":"gpt-5.2","input":"hi"}"#));
        assert_eq!(a, b);
    }

    #[test]
    fn model_and_message_both_matter() {
        let base = SessionHash::from_first_turn(&request(r#"{"model":"gpt-5.2","input":"hi"}"#));
        let other_model =
            SessionHash::from_first_turn(&request(r#"{"model":"gpt-5.3","input":"hi"}"#));
        let other_text =
            SessionHash::from_first_turn(&request(r#"{"model":"gpt-5.2","input":"yo"}"#));
        assert_ne!(base, other_model);
        assert_ne!(base, other_text);
    }
}
