//! Error taxonomy for every component boundary, mapped onto the wire-level
//! `ERROR` codes and close codes in `crate::protocol`.

use thiserror::Error;

use crate::protocol::{CloseCode, ErrorCode};

/// Failures raised by the identity verifier (`crate::identity`).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identity verification timed out")]
    Timeout,
    #[error("token rejected: {0}")]
    Invalid(String),
    #[error("trust anchor request failed: {0}")]
    AnchorUnreachable(String),
    #[error("no identity trust anchor configured and developer bypass is disabled")]
    Unconfigured,
}

impl AuthError {
    pub fn close_code(&self) -> CloseCode {
        CloseCode::AuthFailed
    }

    pub fn reason(&self) -> String {
        match self {
            AuthError::Timeout => "timeout".to_string(),
            AuthError::Invalid(reason) => reason.clone(),
            AuthError::AnchorUnreachable(reason) => reason.clone(),
            AuthError::Unconfigured => "identity verification is not configured".to_string(),
        }
    }
}

/// Failures raised by the room registry / room actor (`crate::room`).
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room is at capacity")]
    RoomFull,
}

impl RoomError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RoomError::RoomFull => ErrorCode::RoomFull,
        }
    }
}

/// Rejection reason for a floor request. Not a hard error: the caller
/// receives `{granted: false, reason}`, the connection stays open, and no
/// broadcast is emitted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FloorError {
    #[error("floor already held")]
    AlreadyHeld,
    #[error("room does not exist")]
    RoomNotFound,
}

impl FloorError {
    pub fn reason(&self) -> &'static str {
        match self {
            FloorError::AlreadyHeld => "ALREADY_HELD",
            FloorError::RoomNotFound => "ROOM_NOT_FOUND",
        }
    }
}

/// Failures raised by the WebRTC relay handlers (`crate::room::actor`).
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("sender does not hold the floor")]
    NotFloorHolder,
}

impl RelayError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RelayError::NotFloorHolder => ErrorCode::WebrtcError,
        }
    }
}

/// Failures raised while decoding an inbound frame (`crate::session`).
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame was not well-formed: {0}")]
    Parse(String),
    #[error("unrecognized message type")]
    UnknownType,
}

impl FrameError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FrameError::Parse(_) => ErrorCode::ParseError,
            FrameError::UnknownType => ErrorCode::UnknownMessage,
        }
    }
}

/// Aggregate error used by call sites (mainly the HTTP status surfaces) that
/// want a single `Result` type spanning more than one component boundary.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
