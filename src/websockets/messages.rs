use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::shared::ChatError;

/// Client -> Server action frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClientAction {
    Join { room_name: String },
    Leave { room_name: String },
    Ping { room_name: String },
    Message { room_name: String, message: String },
}

impl ClientAction {
    /// Parses a text frame. Unknown `type` tags and missing fields are both
    /// protocol errors.
    pub fn parse(frame: &str) -> Result<Self, ChatError> {
        serde_json::from_str(frame).map_err(|e| ChatError::protocol(e.to_string()))
    }

    pub fn room_name(&self) -> &str {
        match self {
            ClientAction::Join { room_name }
            | ClientAction::Leave { room_name }
            | ClientAction::Ping { room_name }
            | ClientAction::Message { room_name, .. } => room_name,
        }
    }

    pub fn action_type(&self) -> &'static str {
        self.into()
    }
}

/// Server -> Client frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServerMessage {
    Join { username: String },
    Leave { username: String },
    /// Usernames are sorted ascending
    Presence { usernames: Vec<String> },
    Broadcast { username: String, message: String },
    Pong,
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, ChatError> {
        serde_json::to_string(self)
            .map_err(|e| ChatError::protocol(format!("Failed to serialize message: {e}")))
    }

    pub fn message_type(&self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(r#"{"type":"join","room_name":"general"}"#, ClientAction::Join { room_name: "general".into() })]
    #[case(r#"{"type":"leave","room_name":"general"}"#, ClientAction::Leave { room_name: "general".into() })]
    #[case(r#"{"type":"ping","room_name":"general"}"#, ClientAction::Ping { room_name: "general".into() })]
    #[case(
        r#"{"type":"message","room_name":"general","message":"Hello!"}"#,
        ClientAction::Message { room_name: "general".into(), message: "Hello!".into() }
    )]
    fn test_parse_client_actions(#[case] frame: &str, #[case] expected: ClientAction) {
        assert_eq!(ClientAction::parse(frame).unwrap(), expected);
    }

    #[rstest]
    #[case(r#"{"type":"dance","room_name":"general"}"#)] // unknown tag
    #[case(r#"{"type":"message","room_name":"general"}"#)] // missing body
    #[case(r#"{"room_name":"general"}"#)] // no tag at all
    #[case("not json")]
    fn test_malformed_frames_are_protocol_errors(#[case] frame: &str) {
        assert!(matches!(
            ClientAction::parse(frame),
            Err(ChatError::Protocol(_))
        ));
    }

    #[test]
    fn test_server_message_wire_shapes() {
        let cases = vec![
            (
                ServerMessage::Join { username: "alice".into() },
                json!({"type": "join", "username": "alice"}),
            ),
            (
                ServerMessage::Leave { username: "alice".into() },
                json!({"type": "leave", "username": "alice"}),
            ),
            (
                ServerMessage::Presence { usernames: vec!["alice".into(), "bob".into()] },
                json!({"type": "presence", "usernames": ["alice", "bob"]}),
            ),
            (
                ServerMessage::Broadcast { username: "bob".into(), message: "Hello!".into() },
                json!({"type": "broadcast", "username": "bob", "message": "Hello!"}),
            ),
            (ServerMessage::Pong, json!({"type": "pong"})),
        ];

        for (message, expected) in cases {
            let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
            assert_eq!(value, expected);
        }
    }

    #[test]
    fn test_type_names() {
        let action = ClientAction::Message { room_name: "r".into(), message: "m".into() };
        assert_eq!(action.action_type(), "message");
        assert_eq!(action.room_name(), "r");
        assert_eq!(ServerMessage::Pong.message_type(), "pong");
    }
}
