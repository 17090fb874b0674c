//! Wire protocol spoken over the relay WebSocket.
//!
//! Every frame is a JSON text message shaped as an envelope:
//! `{"event": "<kebab-case-name>", "data": { ... }}`. Clients send
//! [`ClientEvent`]s, the relay answers and fans out [`ServerEvent`]s.
//! Payloads that belong to the browser (`message`, `sdp`, `candidate`) are
//! opaque JSON and are forwarded unmodified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum length of a room id, in bytes.
pub const MAX_ROOM_ID_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid room id: {0}")]
    InvalidRoomId(String),
    #[error("unknown room kind: {0}")]
    UnknownRoomKind(String),
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Per-connection id assigned by the relay on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export, type = "number"))]
#[serde(transparent)]
pub struct ConnId(u64);

impl ConnId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated room name. Chat rooms are usually a workspace or channel id,
/// video rooms a call id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export, type = "string"))]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        if raw.trim().is_empty() {
            return Err(ProtocolError::InvalidRoomId("room id is empty".into()));
        }
        if raw.len() > MAX_ROOM_ID_LEN {
            return Err(ProtocolError::InvalidRoomId(format!(
                "room id exceeds {MAX_ROOM_ID_LEN} bytes"
            )));
        }
        if raw.chars().any(char::is_control) {
            return Err(ProtocolError::InvalidRoomId(
                "room id contains control characters".into(),
            ));
        }
        Ok(Self(raw.to_string()))
    }
}

impl TryFrom<String> for RoomId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Chat,
    Video,
}

impl RoomKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "video" => Ok(Self::Video),
            other => Err(ProtocolError::UnknownRoomKind(other.to_string())),
        }
    }
}

/// Identity a client binds to its connection. Comes from the hosted auth
/// service; the relay does not verify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            avatar_url: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// A connection together with the user bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Participant {
    pub conn_id: ConnId,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    BadRequest,
    NotIdentified,
    NotInRoom,
    RoomFull,
    PeerNotFound,
    TooManyRooms,
}

/// Events sent by browser clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Identify(UserProfile),
    JoinRoom {
        room_id: RoomId,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    SendMessage {
        room_id: RoomId,
        message: Value,
    },
    Typing {
        room_id: RoomId,
        is_typing: bool,
    },
    JoinVideo {
        room_id: RoomId,
    },
    Offer {
        target: ConnId,
        sdp: Value,
    },
    Answer {
        target: ConnId,
        sdp: Value,
    },
    IceCandidate {
        target: ConnId,
        candidate: Value,
    },
    LeaveVideo {
        room_id: RoomId,
    },
}

impl ClientEvent {
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Event name as it appears on the wire, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify(_) => "identify",
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom { .. } => "leave-room",
            Self::SendMessage { .. } => "send-message",
            Self::Typing { .. } => "typing",
            Self::JoinVideo { .. } => "join-video",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::LeaveVideo { .. } => "leave-video",
        }
    }
}

/// Events sent by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Welcome {
        conn_id: ConnId,
    },
    ActiveUsers {
        users: Vec<Participant>,
    },
    RoomMembers {
        room_id: RoomId,
        members: Vec<Participant>,
    },
    UserJoined {
        room_id: RoomId,
        participant: Participant,
    },
    UserLeft {
        room_id: RoomId,
        conn_id: ConnId,
        user_id: String,
    },
    ReceiveMessage {
        room_id: RoomId,
        message_id: Uuid,
        from: Participant,
        message: Value,
        sent_at: DateTime<Utc>,
    },
    Typing {
        room_id: RoomId,
        from: Participant,
        is_typing: bool,
    },
    VideoParticipants {
        room_id: RoomId,
        participants: Vec<Participant>,
    },
    VideoUserJoined {
        room_id: RoomId,
        participant: Participant,
    },
    Offer {
        from: Participant,
        sdp: Value,
    },
    Answer {
        from: Participant,
        sdp: Value,
    },
    IceCandidate {
        from: Participant,
        candidate: Value,
    },
    VideoUserLeft {
        room_id: RoomId,
        conn_id: ConnId,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_kebab_case_envelope() {
        let event = ClientEvent::decode(
            r#"{"event":"ice-candidate","data":{"target":7,"candidate":{"sdpMid":"0"}}}"#,
        )
        .expect("decode");
        assert_eq!(
            event,
            ClientEvent::IceCandidate {
                target: ConnId::new(7),
                candidate: json!({"sdpMid": "0"}),
            }
        );
        assert_eq!(event.name(), "ice-candidate");
    }

    #[test]
    fn identify_carries_profile_as_data() {
        let event = ClientEvent::decode(
            r#"{"event":"identify","data":{"user_id":"u-1","display_name":"Ada"}}"#,
        )
        .expect("decode");
        assert_eq!(
            event,
            ClientEvent::Identify(UserProfile::new("u-1").with_display_name("Ada"))
        );
    }

    #[test]
    fn rejects_unknown_event_and_bad_room_id() {
        assert!(ClientEvent::decode(r#"{"event":"shout","data":{}}"#).is_err());
        assert!(ClientEvent::decode(r#"{"event":"join-room","data":{"room_id":""}}"#).is_err());
        assert!(ClientEvent::decode("not json").is_err());
    }

    #[test]
    fn room_id_rules() {
        assert!(RoomId::parse("workspace-42").is_ok());
        assert!(RoomId::parse("   ").is_err());
        assert!(RoomId::parse("a\nb").is_err());
        assert!(RoomId::parse(&"x".repeat(MAX_ROOM_ID_LEN)).is_ok());
        assert!(RoomId::parse(&"x".repeat(MAX_ROOM_ID_LEN + 1)).is_err());
    }

    #[test]
    fn server_event_envelope_shape() {
        let encoded = ServerEvent::VideoUserLeft {
            room_id: RoomId::parse("call-1").unwrap(),
            conn_id: ConnId::new(3),
        }
        .encode()
        .expect("encode");
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            value,
            json!({"event": "video-user-left", "data": {"room_id": "call-1", "conn_id": 3}})
        );

        let err = ServerEvent::error(ErrorCode::PeerNotFound, "gone").encode().unwrap();
        assert!(err.contains(r#""code":"peer-not-found""#));
    }

    #[test]
    fn room_kind_parses_path_segments() {
        assert_eq!("chat".parse::<RoomKind>().unwrap(), RoomKind::Chat);
        assert_eq!("video".parse::<RoomKind>().unwrap(), RoomKind::Video);
        assert!("voice".parse::<RoomKind>().is_err());
    }
}
