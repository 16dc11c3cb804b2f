//! The wire protocol exchanged with clients: one JSON object per frame, tagged
//! by a `type` discriminator. Outgoing frames are wrapped in [`Envelope`] so
//! every response carries a server-stamped `timestamp`.

use std::sync::Arc;

use bytestring::ByteString;
use serde::{Deserialize, Serialize};

pub type RoomId = Arc<str>;
pub type UserId = Arc<str>;

/// Roster entry returned in `ROOM_STATE`.
#[derive(Debug, Clone, Serialize)]
pub struct MemberInfo {
    pub user_id: UserId,
    pub display_name: Arc<str>,
}

/// `floor` field of `ROOM_STATE` and the payload of `FLOOR_STATE`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum FloorStateDto {
    Grant {
        #[serde(rename = "holderUserId")]
        holder_user_id: UserId,
        #[serde(rename = "holderDisplayName")]
        holder_display_name: Arc<str>,
    },
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u32>,
}

/// Frames a client may send. The very first frame on a connection must be
/// `Auth` (or `Ping`, which is always permitted).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "AUTH")]
    Auth {
        token: String,
        #[serde(rename = "displayName")]
        display_name: Option<String>,
    },
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "JOIN_ROOM")]
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    #[serde(rename = "LEAVE_ROOM")]
    LeaveRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    #[serde(rename = "REQUEST_FLOOR")]
    RequestFloor {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    #[serde(rename = "RELEASE_FLOOR")]
    ReleaseFloor {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    #[serde(rename = "WEBRTC_OFFER")]
    WebrtcOffer {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        sdp: String,
        #[serde(rename = "targetUserId")]
        target_user_id: Option<UserId>,
    },
    #[serde(rename = "WEBRTC_ANSWER")]
    WebrtcAnswer {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "targetUserId")]
        target_user_id: UserId,
        sdp: String,
    },
    #[serde(rename = "WEBRTC_ICE")]
    WebrtcIce {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        candidate: String,
        #[serde(rename = "sdpMid")]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex")]
        sdp_m_line_index: Option<u32>,
        #[serde(rename = "targetUserId")]
        target_user_id: Option<UserId>,
    },
    #[serde(rename = "WEBRTC_ICE_BATCH")]
    WebrtcIceBatch {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        candidates: Vec<IceCandidate>,
        #[serde(rename = "targetUserId")]
        target_user_id: Option<UserId>,
    },
}

const KNOWN_CLIENT_TAGS: &[&str] = &[
    "AUTH",
    "PING",
    "JOIN_ROOM",
    "LEAVE_ROOM",
    "REQUEST_FLOOR",
    "RELEASE_FLOOR",
    "WEBRTC_OFFER",
    "WEBRTC_ANSWER",
    "WEBRTC_ICE",
    "WEBRTC_ICE_BATCH",
];

#[derive(Deserialize)]
struct TypeTagOnly {
    #[serde(rename = "type")]
    kind: String,
}

impl ClientMessage {
    /// Decodes one inbound frame, distinguishing an unrecognized `type` tag
    /// (`FrameError::UnknownType`) from an otherwise malformed payload
    /// (`FrameError::Parse`), per the router's error taxonomy.
    pub fn decode(raw: &str) -> Result<Self, crate::error::FrameError> {
        let tagged: TypeTagOnly = serde_json::from_str(raw)
            .map_err(|err| crate::error::FrameError::Parse(err.to_string()))?;
        if !KNOWN_CLIENT_TAGS.contains(&tagged.kind.as_str()) {
            return Err(crate::error::FrameError::UnknownType);
        }
        serde_json::from_str(raw).map_err(|err| crate::error::FrameError::Parse(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    NotAuthenticated,
    UnknownMessage,
    RateLimited,
    RoomFull,
    WebrtcError,
    HandlerError,
}

/// Frames the server may send. Wrapped in [`Envelope`] before serialization.
///
/// `FloorRequestResult` is the direct acknowledgment to `REQUEST_FLOOR`
/// (`{granted, reason?}`); it is distinct from the `FLOOR_STATE` broadcast
/// that follows a successful grant or release (see DESIGN.md).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "AUTH_SUCCESS")]
    AuthSuccess {
        #[serde(rename = "userId")]
        user_id: UserId,
        #[serde(rename = "displayName")]
        display_name: Arc<str>,
    },
    #[serde(rename = "AUTH_FAILED")]
    AuthFailed { reason: String },
    #[serde(rename = "PONG")]
    Pong,
    #[serde(rename = "ROOM_STATE")]
    RoomState {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        members: Vec<MemberInfo>,
        floor: FloorStateDto,
    },
    #[serde(rename = "USER_JOINED")]
    UserJoined {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "userId")]
        user_id: UserId,
        #[serde(rename = "displayName")]
        display_name: Arc<str>,
    },
    #[serde(rename = "USER_LEFT")]
    UserLeft {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    #[serde(rename = "FLOOR_STATE")]
    FloorState {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(flatten)]
        state: FloorStateDto,
    },
    #[serde(rename = "FLOOR_REQUEST_RESULT")]
    FloorRequestResult {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        granted: bool,
        reason: Option<&'static str>,
    },
    #[serde(rename = "WEBRTC_OFFER")]
    WebrtcOffer {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        sdp: String,
        #[serde(rename = "fromUserId")]
        from_user_id: UserId,
    },
    #[serde(rename = "WEBRTC_ANSWER")]
    WebrtcAnswer {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        sdp: String,
        #[serde(rename = "fromUserId")]
        from_user_id: UserId,
    },
    #[serde(rename = "WEBRTC_ICE")]
    WebrtcIce {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        candidate: String,
        #[serde(rename = "sdpMid")]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex")]
        sdp_m_line_index: Option<u32>,
        #[serde(rename = "fromUserId")]
        from_user_id: UserId,
    },
    #[serde(rename = "WEBRTC_ICE_BATCH")]
    WebrtcIceBatch {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        candidates: Vec<IceCandidate>,
        #[serde(rename = "fromUserId")]
        from_user_id: UserId,
    },
    #[serde(rename = "ERROR")]
    Error { code: ErrorCode, message: String },
}

impl Serialize for IceCandidate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(Serialize)]
        struct Wire<'a> {
            candidate: &'a str,
            #[serde(rename = "sdpMid")]
            sdp_mid: &'a Option<String>,
            #[serde(rename = "sdpMLineIndex")]
            sdp_m_line_index: &'a Option<u32>,
        }
        Wire {
            candidate: &self.candidate,
            sdp_mid: &self.sdp_mid,
            sdp_m_line_index: &self.sdp_m_line_index,
        }
        .serialize(serializer)
    }
}

/// Every outbound frame is stamped with the server's current time.
#[derive(Clone, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: ServerMessage,
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(message: ServerMessage) -> Self {
        Self {
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl From<ServerMessage> for Envelope {
    fn from(message: ServerMessage) -> Self {
        Envelope::new(message)
    }
}

impl TryFrom<&Envelope> for ByteString {
    type Error = serde_json::Error;

    fn try_from(envelope: &Envelope) -> Result<Self, Self::Error> {
        Ok(ByteString::from(serde_json::to_string(envelope)?))
    }
}

/// Close codes sent on connection-scoped failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    AuthTimeout,
    AuthFailed,
    ServerAtCapacity,
    Replaced,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            CloseCode::AuthTimeout => 4001,
            CloseCode::AuthFailed => 4002,
            CloseCode::ServerAtCapacity => 4003,
            CloseCode::Replaced => 4010,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            CloseCode::AuthTimeout => "AUTH_TIMEOUT",
            CloseCode::AuthFailed => "AUTH_FAILED",
            CloseCode::ServerAtCapacity => "SERVER_AT_CAPACITY",
            CloseCode::Replaced => "REPLACED",
        }
    }

    pub fn as_ws_reason(self) -> actix_web_actors::ws::CloseReason {
        actix_web_actors::ws::CloseReason {
            code: actix_web_actors::ws::CloseCode::Other(self.code()),
            description: Some(self.reason().to_string()),
        }
    }
}
