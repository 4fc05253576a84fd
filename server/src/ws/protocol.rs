//! Inbound frame decoding.
//!
//! Every client frame is `{"type": string, "data": object}`. Decoding
//! failures are fatal protocol violations; everything past decoding is the
//! connection's business.

use serde::Deserialize;
use serde_json::error::Category;

use crate::ids::ChannelId;
use crate::ws::error::ConnectionError;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct TypingData {
    #[serde(with = "crate::ids::string")]
    channel: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { token: String },
    Heartbeat,
    StartTyping { channel: ChannelId },
    StopTyping { channel: ChannelId },
}

impl Command {
    /// The `type` this command arrived as, echoed in `error` replies.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Login { .. } => "login",
            Command::Heartbeat => "heartbeat",
            Command::StartTyping { .. } => "start_typing",
            Command::StopTyping { .. } => "stop_typing",
        }
    }
}

fn classify(e: serde_json::Error) -> ConnectionError {
    match e.classify() {
        Category::Data => ConnectionError::policy(e.to_string()),
        Category::Syntax | Category::Eof | Category::Io => ConnectionError::InvalidJson,
    }
}

/// Decode one text frame into a command.
pub fn parse_frame(raw: &str) -> Result<Command, ConnectionError> {
    let envelope: Envelope = serde_json::from_str(raw).map_err(classify)?;

    if envelope.kind.is_empty() {
        return Err(ConnectionError::policy("Invalid type"));
    }
    if !envelope.data.is_object() {
        return Err(ConnectionError::policy("Invalid data"));
    }

    match envelope.kind.as_str() {
        "login" => {
            let data: LoginData =
                serde_json::from_value(envelope.data).map_err(|_| ConnectionError::InvalidJson)?;
            Ok(Command::Login { token: data.token })
        }
        "heartbeat" => Ok(Command::Heartbeat),
        "start_typing" | "stop_typing" => {
            let data: TypingData =
                serde_json::from_value(envelope.data).map_err(|_| ConnectionError::InvalidJson)?;
            if envelope.kind == "start_typing" {
                Ok(Command::StartTyping {
                    channel: data.channel,
                })
            } else {
                Ok(Command::StopTyping {
                    channel: data.channel,
                })
            }
        }
        other => Err(ConnectionError::policy(format!(
            "Unknown message type: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::error::close_code;

    fn close_of(err: ConnectionError) -> (u16, String) {
        let frame = err.close_frame().unwrap();
        (frame.code, frame.reason.as_str().to_string())
    }

    #[test]
    fn parses_each_command() {
        assert_eq!(
            parse_frame(r#"{"type":"login","data":{"token":"abc"}}"#).unwrap(),
            Command::Login {
                token: "abc".into()
            }
        );
        assert_eq!(
            parse_frame(r#"{"type":"heartbeat","data":{}}"#).unwrap(),
            Command::Heartbeat
        );
        assert_eq!(
            parse_frame(r#"{"type":"start_typing","data":{"channel":"12"}}"#).unwrap(),
            Command::StartTyping { channel: 12 }
        );
        assert_eq!(
            parse_frame(r#"{"type":"stop_typing","data":{"channel":12}}"#).unwrap(),
            Command::StopTyping { channel: 12 }
        );
    }

    #[test]
    fn missing_data_is_a_policy_violation_naming_data() {
        let (code, reason) = close_of(parse_frame(r#"{"type":"ping"}"#).unwrap_err());
        assert_eq!(code, close_code::POLICY_VIOLATION);
        assert!(reason.contains("data"), "reason was {reason:?}");
    }

    #[test]
    fn broken_json_is_invalid_json() {
        let (code, reason) = close_of(parse_frame(r#"{"type":"#).unwrap_err());
        assert_eq!(code, close_code::POLICY_VIOLATION);
        assert_eq!(reason, "Invalid JSON");
    }

    #[test]
    fn empty_type_and_non_object_data_are_rejected() {
        let (_, reason) = close_of(parse_frame(r#"{"type":"","data":{}}"#).unwrap_err());
        assert_eq!(reason, "Invalid type");
        let (_, reason) = close_of(parse_frame(r#"{"type":"heartbeat","data":[]}"#).unwrap_err());
        assert_eq!(reason, "Invalid data");
    }

    #[test]
    fn unknown_type_is_named_in_the_reason() {
        let (code, reason) = close_of(parse_frame(r#"{"type":"dance","data":{}}"#).unwrap_err());
        assert_eq!(code, close_code::POLICY_VIOLATION);
        assert_eq!(reason, "Unknown message type: dance");
    }

    #[test]
    fn malformed_command_data_is_invalid_json() {
        assert!(matches!(
            parse_frame(r#"{"type":"login","data":{}}"#),
            Err(ConnectionError::InvalidJson)
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"start_typing","data":{"channel":"x"}}"#),
            Err(ConnectionError::InvalidJson)
        ));
    }
}
