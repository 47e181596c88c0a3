use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::server_utils::{normalize_session_id, sanitize_participant_id};
use crate::types::SessionSnapshot;

#[derive(Debug)]
pub enum ParsedClientMessage {
    CreateSession {
        participant_id: String,
    },
    JoinSession {
        session_id: String,
        participant_id: String,
    },
    Publish {
        session_id: String,
        snapshot: SessionSnapshot,
    },
    Subscribe {
        session_id: String,
    },
    Unsubscribe {
        session_id: String,
    },
    Ping {
        t: f64,
    },
}

impl ParsedClientMessage {
    /// Wire form accepted by [`parse_client_message`].
    pub fn to_json(&self) -> String {
        let value = match self {
            Self::CreateSession { participant_id } => {
                json!({ "type": "create_session", "participantId": participant_id })
            }
            Self::JoinSession {
                session_id,
                participant_id,
            } => json!({
                "type": "join_session",
                "sessionId": session_id,
                "participantId": participant_id,
            }),
            Self::Publish {
                session_id,
                snapshot,
            } => json!({ "type": "publish", "sessionId": session_id, "snapshot": snapshot }),
            Self::Subscribe { session_id } => {
                json!({ "type": "subscribe", "sessionId": session_id })
            }
            Self::Unsubscribe { session_id } => {
                json!({ "type": "unsubscribe", "sessionId": session_id })
            }
            Self::Ping { t } => json!({ "type": "ping", "t": t }),
        };
        value.to_string()
    }
}

/// Every client message except `unsubscribe` gets exactly one reply, in
/// request order. `snapshot` pushes interleave freely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    SessionCreated { session_id: Option<String> },
    #[serde(rename_all = "camelCase")]
    JoinResult { session_id: String, ok: bool },
    #[serde(rename_all = "camelCase")]
    Published { session_id: String },
    #[serde(rename_all = "camelCase")]
    Subscribed { session_id: String },
    #[serde(rename_all = "camelCase")]
    Snapshot {
        session_id: String,
        snapshot: SessionSnapshot,
    },
    Error { message: String },
    Pong { t: f64 },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|error| {
            format!(r#"{{"type":"error","message":"encode failed: {error}"}}"#)
        })
    }
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "create_session" => {
            let participant_id =
                sanitize_participant_id(object.get("participantId")?.as_str())?;
            Some(ParsedClientMessage::CreateSession { participant_id })
        }
        "join_session" => {
            let session_id = parse_session_id(object.get("sessionId"))?;
            let participant_id =
                sanitize_participant_id(object.get("participantId")?.as_str())?;
            Some(ParsedClientMessage::JoinSession {
                session_id,
                participant_id,
            })
        }
        "publish" => {
            let session_id = parse_session_id(object.get("sessionId"))?;
            let snapshot = serde_json::from_value(object.get("snapshot")?.clone()).ok()?;
            Some(ParsedClientMessage::Publish {
                session_id,
                snapshot,
            })
        }
        "subscribe" => {
            let session_id = parse_session_id(object.get("sessionId"))?;
            Some(ParsedClientMessage::Subscribe { session_id })
        }
        "unsubscribe" => {
            let session_id = parse_session_id(object.get("sessionId"))?;
            Some(ParsedClientMessage::Unsubscribe { session_id })
        }
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_session_id(value: Option<&Value>) -> Option<String> {
    normalize_session_id(value?.as_str())
}
