//! Wire envelope shared by every push frame (`spec.md` §4.8, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrameType {
    Request,
    Response,
    Event,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub event: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl Envelope {
    pub fn event(room: impl Into<String>, event: impl Into<String>, data: Value) -> Self {
        Self {
            frame_type: FrameType::Event,
            event: event.into(),
            data,
            id: None,
            correlation_id: None,
            room: Some(room.into()),
        }
    }

    pub fn response(id: impl Into<String>, event: impl Into<String>, data: Value) -> Self {
        Self {
            frame_type: FrameType::Response,
            event: event.into(),
            data,
            id: Some(id.into()),
            correlation_id: None,
            room: None,
        }
    }

    pub fn error(id: Option<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Error,
            event: "error".to_string(),
            data: serde_json::json!({ "code": code.as_str(), "message": message.into() }),
            id,
            correlation_id: None,
            room: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownRequest,
    Forbidden,
    RateLimited,
    NotFound,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownRequest => "UNKNOWN_REQUEST",
            Self::Forbidden => "FORBIDDEN",
            Self::RateLimited => "RATE_LIMITED",
            Self::NotFound => "NOT_FOUND",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_carries_code_and_message_in_data() {
        let env = Envelope::error(Some("req-1".to_string()), ErrorCode::Forbidden, "nope");
        assert_eq!(env.frame_type, FrameType::Error);
        assert_eq!(env.data["code"], "FORBIDDEN");
        assert_eq!(env.data["message"], "nope");
    }

    #[test]
    fn event_envelope_carries_room_but_no_id() {
        let env = Envelope::event("pool:abc", "pool.scaled", serde_json::json!({}));
        assert_eq!(env.room.as_deref(), Some("pool:abc"));
        assert!(env.id.is_none());
    }
}
