//! Connection (C2): the per-client WebSocket actor ([`actor::Session`]) and
//! the internal messages used to push frames to it ([`message`]).

pub mod actor;
pub mod message;
