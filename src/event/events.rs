use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::shared::ChatError;

/// Events exchanged between server processes over the event bus
///
/// Events represent facts about things that have already happened on some
/// connection, in some process. Every process fans them out to its own local
/// members of the room.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ChatEvent {
    /// An identity joined a room
    Join { room: String, identity: String },

    /// An identity left a room, explicitly or by disconnecting
    Leave { room: String, identity: String },

    /// An identity sent a message to a room
    Broadcast {
        room: String,
        identity: String,
        message: String,
    },
}

/// Wire shape on the bus: `{"type": "...", "args": [room, identity, ...]}`
#[derive(Debug, Serialize, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    kind: String,
    args: Vec<String>,
}

impl ChatEvent {
    pub fn room(&self) -> &str {
        match self {
            ChatEvent::Join { room, .. }
            | ChatEvent::Leave { room, .. }
            | ChatEvent::Broadcast { room, .. } => room,
        }
    }

    pub fn identity(&self) -> &str {
        match self {
            ChatEvent::Join { identity, .. }
            | ChatEvent::Leave { identity, .. }
            | ChatEvent::Broadcast { identity, .. } => identity,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.into()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ChatError> {
        let args = match self {
            ChatEvent::Join { room, identity } | ChatEvent::Leave { room, identity } => {
                vec![room.clone(), identity.clone()]
            }
            ChatEvent::Broadcast {
                room,
                identity,
                message,
            } => vec![room.clone(), identity.clone(), message.clone()],
        };
        let envelope = EventEnvelope {
            kind: self.event_type().to_string(),
            args,
        };

        serde_json::to_vec(&envelope)
            .map_err(|e| ChatError::protocol(format!("Failed to encode event: {e}")))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ChatError> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)
            .map_err(|e| ChatError::protocol(format!("Malformed event: {e}")))?;

        match (envelope.kind.as_str(), envelope.args.as_slice()) {
            ("join", [room, identity]) => Ok(ChatEvent::Join {
                room: room.clone(),
                identity: identity.clone(),
            }),
            ("leave", [room, identity]) => Ok(ChatEvent::Leave {
                room: room.clone(),
                identity: identity.clone(),
            }),
            ("broadcast", [room, identity, message]) => Ok(ChatEvent::Broadcast {
                room: room.clone(),
                identity: identity.clone(),
                message: message.clone(),
            }),
            ("join" | "leave" | "broadcast", args) => Err(ChatError::protocol(format!(
                "Event {} has {} arguments",
                envelope.kind,
                args.len()
            ))),
            (other, _) => Err(ChatError::protocol(format!(
                "Unrecognized event type: {other}"
            ))),
        }
    }
}
