//! Supervisor (C7): shared application state, the global connection-count
//! capacity guard, and the read-only HTTP status surfaces (`/health`,
//! `/stats`, `/debug`). The WebSocket accept path and route wiring live in
//! [`http`], which owns the actix-web `App`/`HttpServer` setup.

pub mod http;

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use actix::Addr;
use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::config::Settings;
use crate::identity::IdentityVerifier;
use crate::room::{GetStats, RoomRegistry};

/// Shared, process-wide state handed to every actix-web worker thread via
/// `Data<AppState>`. The registry address and identity verifier are cheap to
/// clone (`Addr` and `Arc` respectively); `connections` is the only mutable
/// piece, and it is touched only with atomic increments/decrements.
pub struct AppState {
    pub settings: Arc<Settings>,
    pub identity: Arc<IdentityVerifier>,
    pub registry: Addr<RoomRegistry>,
    pub connections: Arc<AtomicUsize>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, identity: Arc<IdentityVerifier>, registry: Addr<RoomRegistry>) -> Self {
        Self {
            settings,
            identity,
            registry,
            connections: Arc::new(AtomicUsize::new(0)),
            started_at: Instant::now(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rooms: usize,
    connections: usize,
}

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let rooms = room_count(&state).await;
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().timestamp_millis(),
        rooms,
        connections: state.connections.load(Ordering::SeqCst),
    })
}

#[derive(Serialize)]
struct StatsResponse {
    rooms: usize,
    connections: usize,
    #[serde(rename = "uptimeSecs")]
    uptime_secs: u64,
    #[serde(rename = "memoryRssKb")]
    memory_rss_kb: Option<u64>,
}

pub async fn stats(state: web::Data<AppState>) -> HttpResponse {
    let rooms = room_count(&state).await;
    HttpResponse::Ok().json(StatsResponse {
        rooms,
        connections: state.connections.load(Ordering::SeqCst),
        uptime_secs: state.started_at.elapsed().as_secs(),
        memory_rss_kb: current_rss_kb(),
    })
}

#[derive(Serialize)]
struct DebugResponse {
    #[serde(rename = "nonProduction")]
    non_production: bool,
    #[serde(rename = "authMode")]
    auth_mode: &'static str,
    #[serde(rename = "heartbeatIntervalMs")]
    heartbeat_interval_ms: u64,
    #[serde(rename = "authTimeoutMs")]
    auth_timeout_ms: u64,
    #[serde(rename = "maxConnectionsPerRoom")]
    max_connections_per_room: usize,
    #[serde(rename = "maxTotalConnections")]
    max_total_connections: usize,
    #[serde(rename = "messageRateLimit")]
    message_rate_limit: u32,
    #[serde(rename = "floorTtlSecs")]
    floor_ttl_secs: u64,
    #[serde(rename = "corsAllowedOrigins")]
    cors_allowed_origins: Vec<String>,
}

/// Configuration reflection. Deliberately excludes the trust anchor URL and
/// any credential material — only the booleans/counters a operator would
/// want to confirm are live.
pub async fn debug(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(DebugResponse {
        non_production: state.settings.non_production,
        auth_mode: state.identity.mode_label(),
        heartbeat_interval_ms: state.settings.heartbeat_interval_ms,
        auth_timeout_ms: state.settings.auth_timeout_ms,
        max_connections_per_room: state.settings.max_connections_per_room,
        max_total_connections: state.settings.max_total_connections,
        message_rate_limit: state.settings.message_rate_limit,
        floor_ttl_secs: state.settings.floor_ttl_secs,
        cors_allowed_origins: state.settings.cors_origins(),
    })
}

async fn room_count(state: &AppState) -> usize {
    match state.registry.send(GetStats).await {
        Ok(stats) => stats.room_count,
        Err(err) => {
            log::error!("room registry unreachable while collecting stats: {err}");
            0
        }
    }
}

/// Best-effort resident-set-size reader for `/stats`. Returns `None` on any
/// platform or parse failure rather than treating it as a hard error — this
/// is an operational nicety, not a correctness concern.
fn current_rss_kb() -> Option<u64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    status.lines().find_map(|line| {
        let rest = line.strip_prefix("VmRSS:")?;
        rest.trim().split_whitespace().next()?.parse().ok()
    })
}
