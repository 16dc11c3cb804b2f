//! End-to-end WebSocket session test: connect, authenticate via the
//! developer-bypass identity path, join a room, win the floor, and relay a
//! WebRTC offer to the other member — exercising the real `actix-web` app
//! factory from `ptt_signal_srv::server::http`, the same `configure()` the
//! live binary registers its routes with.

use std::sync::Arc;
use std::time::Duration;

use actix::Actor;
use actix_web::{web, App};
use awc::error::WsProtocolError;
use awc::ws;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};

use ptt_signal_srv::config::Settings;
use ptt_signal_srv::identity::IdentityVerifier;
use ptt_signal_srv::room::RoomRegistry;
use ptt_signal_srv::server::http::configure;
use ptt_signal_srv::server::AppState;

fn bypass_token(user_id: &str, display_name: &str) -> String {
    let payload = json!({ "userId": user_id, "displayName": display_name });
    let encoded = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("header.{encoded}.sig")
}

fn test_settings() -> Settings {
    Settings {
        port: 0,
        heartbeat_interval_ms: 15_000,
        auth_timeout_ms: 30_000,
        max_connections_per_room: 50,
        max_total_connections: 500,
        message_rate_limit: 100,
        identity_trust_anchor_url: None,
        cors_allowed_origins: "*".to_string(),
        non_production: true,
        floor_ttl_secs: 120,
    }
}

/// Reads the next text frame, retrying through PING control frames the
/// server may interleave with its own heartbeat.
async fn next_json(framed: &mut (impl StreamExt<Item = Result<ws::Frame, WsProtocolError>> + Unpin)) -> Value {
    loop {
        match framed.next().await.expect("stream ended unexpectedly").unwrap() {
            ws::Frame::Text(bytes) => return serde_json::from_slice(&bytes).unwrap(),
            ws::Frame::Ping(_) | ws::Frame::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[actix_web::test]
async fn happy_path_auth_join_floor_and_offer_relay() {
    let settings = Arc::new(test_settings());
    let identity = Arc::new(IdentityVerifier::new(&settings));
    let registry = RoomRegistry::new(Arc::clone(&settings)).start();
    let state = web::Data::new(AppState::new(Arc::clone(&settings), identity, registry));

    let srv = actix_test::start(move || App::new().app_data(state.clone()).configure(configure));

    let mut a = srv.ws_at("/ws").await.unwrap();
    let mut b = srv.ws_at("/ws").await.unwrap();

    a.send(ws::Message::Text(
        json!({"type": "AUTH", "token": bypass_token("u1", "Alice")}).to_string().into(),
    ))
    .await
    .unwrap();
    let auth_a = next_json(&mut a).await;
    assert_eq!(auth_a["type"], "AUTH_SUCCESS");
    assert_eq!(auth_a["userId"], "u1");

    b.send(ws::Message::Text(
        json!({"type": "AUTH", "token": bypass_token("u2", "Bob")}).to_string().into(),
    ))
    .await
    .unwrap();
    let auth_b = next_json(&mut b).await;
    assert_eq!(auth_b["type"], "AUTH_SUCCESS");
    assert_eq!(auth_b["userId"], "u2");

    a.send(ws::Message::Text(json!({"type": "JOIN_ROOM", "roomId": "r1"}).to_string().into()))
        .await
        .unwrap();
    let room_state_a = next_json(&mut a).await;
    assert_eq!(room_state_a["type"], "ROOM_STATE");
    assert_eq!(room_state_a["floor"]["state"], "none");

    b.send(ws::Message::Text(json!({"type": "JOIN_ROOM", "roomId": "r1"}).to_string().into()))
        .await
        .unwrap();
    let user_joined_a = next_json(&mut a).await;
    assert_eq!(user_joined_a["type"], "USER_JOINED");
    assert_eq!(user_joined_a["userId"], "u2");
    let _room_state_b = next_json(&mut b).await;

    a.send(ws::Message::Text(json!({"type": "REQUEST_FLOOR", "roomId": "r1"}).to_string().into()))
        .await
        .unwrap();
    let grant_result = next_json(&mut a).await;
    assert_eq!(grant_result["type"], "FLOOR_REQUEST_RESULT");
    assert_eq!(grant_result["granted"], true);

    let floor_state_a = next_json(&mut a).await;
    assert_eq!(floor_state_a["type"], "FLOOR_STATE");
    assert_eq!(floor_state_a["state"], "grant");
    assert_eq!(floor_state_a["holderUserId"], "u1");

    let floor_state_b = next_json(&mut b).await;
    assert_eq!(floor_state_b["type"], "FLOOR_STATE");
    assert_eq!(floor_state_b["holderUserId"], "u1");

    a.send(ws::Message::Text(
        json!({"type": "WEBRTC_OFFER", "roomId": "r1", "sdp": "o1"}).to_string().into(),
    ))
    .await
    .unwrap();
    let offer_b = next_json(&mut b).await;
    assert_eq!(offer_b["type"], "WEBRTC_OFFER");
    assert_eq!(offer_b["sdp"], "o1");
    assert_eq!(offer_b["fromUserId"], "u1");
}

#[actix_web::test]
async fn non_holder_offer_is_rejected_and_not_delivered() {
    let settings = Arc::new(test_settings());
    let identity = Arc::new(IdentityVerifier::new(&settings));
    let registry = RoomRegistry::new(Arc::clone(&settings)).start();
    let state = web::Data::new(AppState::new(Arc::clone(&settings), identity, registry));

    let srv = actix_test::start(move || App::new().app_data(state.clone()).configure(configure));

    let mut a = srv.ws_at("/ws").await.unwrap();
    let mut b = srv.ws_at("/ws").await.unwrap();

    a.send(ws::Message::Text(
        json!({"type": "AUTH", "token": bypass_token("u1", "Alice")}).to_string().into(),
    ))
    .await
    .unwrap();
    let _ = next_json(&mut a).await;
    b.send(ws::Message::Text(
        json!({"type": "AUTH", "token": bypass_token("u2", "Bob")}).to_string().into(),
    ))
    .await
    .unwrap();
    let _ = next_json(&mut b).await;

    a.send(ws::Message::Text(json!({"type": "JOIN_ROOM", "roomId": "r1"}).to_string().into()))
        .await
        .unwrap();
    let _ = next_json(&mut a).await;
    b.send(ws::Message::Text(json!({"type": "JOIN_ROOM", "roomId": "r1"}).to_string().into()))
        .await
        .unwrap();
    let _user_joined_a = next_json(&mut a).await;
    let _room_state_b = next_json(&mut b).await;

    // B never requested the floor; its offer must be rejected, not relayed.
    b.send(ws::Message::Text(
        json!({"type": "WEBRTC_OFFER", "roomId": "r1", "sdp": "bad"}).to_string().into(),
    ))
    .await
    .unwrap();
    let error_b = next_json(&mut b).await;
    assert_eq!(error_b["type"], "ERROR");
    assert_eq!(error_b["code"], "WEBRTC_ERROR");

    // A must receive nothing further within a short window.
    let timed_out = actix_rt::time::timeout(Duration::from_millis(200), next_json(&mut a)).await;
    assert!(timed_out.is_err(), "floor holder should not receive a rejected offer");
}
