//! Signaling and floor-control server for a push-to-talk voice application.
//!
//! Split into a library so the `actix-web`/`actix` wiring in [`server`] can
//! be exercised end-to-end from an integration test (`tests/`) as well as
//! from the `ptt-signal-srv` binary (`src/main.rs`).

pub mod config;
pub mod error;
pub mod floor;
pub mod identity;
pub mod protocol;
pub mod ratelimit;
pub mod room;
pub mod server;
pub mod session;
pub mod utils;
