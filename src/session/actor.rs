//! Connection (C2): one actor per live WebSocket, owning the authentication
//! slot, heartbeat state, rate limiter, and joined-rooms cache. Frame parsing
//! and dispatch (C5, the Message Router) and the WebRTC relay calls (C6)
//! live here too, since in this actor model the
//! connection *is* the natural place to hold per-connection protocol state;
//! all shared state (rooms, floor) is reached only through
//! [`crate::room::RoomRegistry`] messages.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix::prelude::*;
use actix_web_actors::ws::{self, ProtocolError, WebsocketContext};
use bytestring::ByteString;

use crate::config::Settings;
use crate::error::FrameError;
use crate::identity::{IdentityVerifier, Principal};
use crate::protocol::{ClientMessage, CloseCode, Envelope, ErrorCode, RoomId, ServerMessage, UserId};
use crate::ratelimit::RateLimiter;
use crate::room::{self, RoomRegistry};
use crate::session::message::{CloseWith, SendFrame};

/// Two missed pongs are tolerated (absorbing a brief stall); the third
/// triggers termination. Resets to zero on any pong.
const MAX_MISSED_HEARTBEATS: u32 = 3;
/// How long an unauthenticated connection is kept open after a protocol
/// violation on its very first frame, just long enough to flush the error.
const FIRST_FRAME_VIOLATION_GRACE: Duration = Duration::from_millis(250);

pub struct Session {
    principal: Option<Principal>,
    rooms: HashSet<RoomId>,
    rate_limiter: RateLimiter,
    is_alive: bool,
    missed_heartbeats: u32,
    first_frame_seen: bool,
    auth_timeout_handle: Option<SpawnHandle>,
    registry: Addr<RoomRegistry>,
    identity: Arc<IdentityVerifier>,
    settings: Arc<Settings>,
    connections: Arc<AtomicUsize>,
    slot_reserved: bool,
}

impl Session {
    pub fn new(
        registry: Addr<RoomRegistry>,
        identity: Arc<IdentityVerifier>,
        settings: Arc<Settings>,
        connections: Arc<AtomicUsize>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(settings.message_rate_limit);
        Self {
            principal: None,
            rooms: HashSet::new(),
            rate_limiter,
            is_alive: true,
            missed_heartbeats: 0,
            first_frame_seen: false,
            auth_timeout_handle: None,
            registry,
            identity,
            settings,
            connections,
            slot_reserved: false,
        }
    }

    fn reserve_connection_slot(&mut self) -> bool {
        loop {
            let current = self.connections.load(Ordering::SeqCst);
            if current >= self.settings.max_total_connections {
                return false;
            }
            if self
                .connections
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.slot_reserved = true;
                return true;
            }
        }
    }

    fn start_heartbeat(&mut self, ctx: &mut WebsocketContext<Self>) {
        let interval = self.settings.heartbeat_interval();
        ctx.run_interval(interval, |act, ctx| {
            if !act.is_alive {
                act.missed_heartbeats += 1;
                if act.missed_heartbeats >= MAX_MISSED_HEARTBEATS {
                    log::info!("terminating connection after {} missed heartbeats", act.missed_heartbeats);
                    ctx.stop();
                    return;
                }
            }
            act.is_alive = false;
            ctx.ping(b"");
        });
    }

    fn arm_auth_timeout(&mut self, ctx: &mut WebsocketContext<Self>) {
        let timeout = self.settings.auth_timeout();
        let handle = ctx.run_later(timeout, |act, ctx| {
            if act.principal.is_none() {
                log::info!("closing unauthenticated connection after auth timeout");
                act.close_with(ctx, CloseCode::AuthTimeout);
            }
        });
        self.auth_timeout_handle = Some(handle);
    }

    fn send_envelope(&self, ctx: &mut WebsocketContext<Self>, envelope: Envelope) {
        match ByteString::try_from(&envelope) {
            Ok(text) => ctx.text(text),
            Err(err) => log::error!("failed to serialize outbound frame: {err}"),
        }
    }

    fn send_message(&self, ctx: &mut WebsocketContext<Self>, message: ServerMessage) {
        self.send_envelope(ctx, Envelope::new(message));
    }

    fn send_error(&self, ctx: &mut WebsocketContext<Self>, code: ErrorCode, message: impl Into<String>) {
        self.send_message(ctx, ServerMessage::Error { code, message: message.into() });
    }

    fn close_with(&mut self, ctx: &mut WebsocketContext<Self>, code: CloseCode) {
        ctx.close(Some(code.as_ws_reason()));
        ctx.stop();
    }

    fn on_frame(&mut self, raw: &str, ctx: &mut WebsocketContext<Self>) {
        let is_first_frame = !self.first_frame_seen;
        self.first_frame_seen = true;

        if !self.rate_limiter.record() {
            self.send_error(ctx, ErrorCode::RateLimited, "message rate limit exceeded");
            return;
        }

        let message = match ClientMessage::decode(raw) {
            Ok(message) => message,
            Err(err) => {
                self.reject_frame(ctx, err, is_first_frame);
                return;
            }
        };

        let authenticated = self.principal.is_some();
        if !authenticated && !matches!(message, ClientMessage::Auth { .. } | ClientMessage::Ping) {
            self.send_error(ctx, ErrorCode::NotAuthenticated, "authenticate before any other message");
            if is_first_frame {
                self.schedule_first_frame_violation_close(ctx);
            }
            return;
        }

        self.dispatch(message, ctx);
    }

    fn reject_frame(&mut self, ctx: &mut WebsocketContext<Self>, err: FrameError, is_first_frame: bool) {
        self.send_error(ctx, err.error_code(), err.to_string());
        if is_first_frame {
            self.schedule_first_frame_violation_close(ctx);
        }
    }

    fn schedule_first_frame_violation_close(&mut self, ctx: &mut WebsocketContext<Self>) {
        ctx.run_later(FIRST_FRAME_VIOLATION_GRACE, |act, ctx| {
            if act.principal.is_none() {
                ctx.stop();
            }
        });
    }

    fn dispatch(&mut self, message: ClientMessage, ctx: &mut WebsocketContext<Self>) {
        match message {
            ClientMessage::Auth { token, display_name } => self.handle_auth(token, display_name, ctx),
            ClientMessage::Ping => self.send_message(ctx, ServerMessage::Pong),
            ClientMessage::JoinRoom { room_id } => self.handle_join(room_id, ctx),
            ClientMessage::LeaveRoom { room_id } => self.handle_leave(room_id),
            ClientMessage::RequestFloor { room_id } => self.handle_request_floor(room_id, ctx),
            ClientMessage::ReleaseFloor { room_id } => self.handle_release_floor(room_id),
            ClientMessage::WebrtcOffer { room_id, sdp, target_user_id } => {
                self.handle_offer(room_id, sdp, target_user_id, ctx)
            }
            ClientMessage::WebrtcAnswer { room_id, target_user_id, sdp } => {
                self.handle_answer(room_id, target_user_id, sdp)
            }
            ClientMessage::WebrtcIce {
                room_id,
                candidate,
                sdp_mid,
                sdp_m_line_index,
                target_user_id,
            } => self.handle_ice(room_id, candidate, sdp_mid, sdp_m_line_index, target_user_id),
            ClientMessage::WebrtcIceBatch { room_id, candidates, target_user_id } => {
                self.handle_ice_batch(room_id, candidates, target_user_id)
            }
        }
    }

    fn handle_auth(&mut self, token: String, display_name: Option<String>, ctx: &mut WebsocketContext<Self>) {
        let identity = Arc::clone(&self.identity);
        async move { identity.verify(&token, display_name.as_deref()).await }
            .into_actor(self)
            .then(|res, act, ctx| {
                match res {
                    Ok(principal) => {
                        if let Some(handle) = act.auth_timeout_handle.take() {
                            ctx.cancel_future(handle);
                        }
                        act.send_message(
                            ctx,
                            ServerMessage::AuthSuccess {
                                user_id: Arc::clone(&principal.user_id),
                                display_name: Arc::clone(&principal.display_name),
                            },
                        );
                        act.principal = Some(principal);
                    }
                    Err(err) => {
                        act.send_message(ctx, ServerMessage::AuthFailed { reason: err.reason() });
                        act.close_with(ctx, err.close_code());
                    }
                }
                actix::fut::ready(())
            })
            .wait(ctx);
    }

    fn handle_join(&mut self, room_id: RoomId, ctx: &mut WebsocketContext<Self>) {
        let Some(principal) = self.principal.clone() else { return };
        let conn = crate::session::message::ConnHandle::from_addr(ctx.address());
        let room_id_for_insert = Arc::clone(&room_id);
        self.registry
            .send(room::JoinRoom {
                room_id,
                user_id: Arc::clone(&principal.user_id),
                display_name: Arc::clone(&principal.display_name),
                conn,
            })
            .into_actor(self)
            .then(move |res, act, ctx| {
                match res {
                    Ok(Ok(())) => {
                        act.rooms.insert(room_id_for_insert);
                    }
                    Ok(Err(err)) => act.send_error(ctx, err.error_code(), err.to_string()),
                    Err(mailbox_err) => act.send_error(ctx, ErrorCode::HandlerError, mailbox_err.to_string()),
                }
                actix::fut::ready(())
            })
            .wait(ctx);
    }

    fn handle_leave(&mut self, room_id: RoomId) {
        let Some(principal) = self.principal.clone() else { return };
        self.rooms.remove(&room_id);
        self.registry.do_send(room::LeaveRoom { room_id, user_id: principal.user_id });
    }

    fn handle_request_floor(&mut self, room_id: RoomId, ctx: &mut WebsocketContext<Self>) {
        let Some(principal) = self.principal.clone() else { return };
        let room_id_for_reply = Arc::clone(&room_id);
        self.registry
            .send(room::RequestFloor {
                room_id,
                user_id: Arc::clone(&principal.user_id),
                display_name: Arc::clone(&principal.display_name),
            })
            .into_actor(self)
            .then(move |res, act, ctx| {
                match res {
                    Ok(Ok(_grant)) => act.send_message(
                        ctx,
                        ServerMessage::FloorRequestResult {
                            room_id: room_id_for_reply,
                            granted: true,
                            reason: None,
                        },
                    ),
                    Ok(Err(floor_err)) => act.send_message(
                        ctx,
                        ServerMessage::FloorRequestResult {
                            room_id: room_id_for_reply,
                            granted: false,
                            reason: Some(floor_err.reason()),
                        },
                    ),
                    Err(mailbox_err) => act.send_error(ctx, ErrorCode::HandlerError, mailbox_err.to_string()),
                }
                actix::fut::ready(())
            })
            .wait(ctx);
    }

    fn handle_release_floor(&mut self, room_id: RoomId) {
        let Some(principal) = self.principal.clone() else { return };
        self.registry.do_send(room::ReleaseFloor { room_id, user_id: principal.user_id });
    }

    fn handle_offer(
        &mut self,
        room_id: RoomId,
        sdp: String,
        target_user_id: Option<UserId>,
        ctx: &mut WebsocketContext<Self>,
    ) {
        let Some(principal) = self.principal.clone() else { return };
        self.registry
            .send(room::RelayOffer { room_id, sender_id: principal.user_id, sdp, target_user_id })
            .into_actor(self)
            .then(|res, act, ctx| {
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => act.send_error(ctx, err.error_code(), err.to_string()),
                    Err(mailbox_err) => act.send_error(ctx, ErrorCode::HandlerError, mailbox_err.to_string()),
                }
                actix::fut::ready(())
            })
            .wait(ctx);
    }

    fn handle_answer(&mut self, room_id: RoomId, target_user_id: UserId, sdp: String) {
        let Some(principal) = self.principal.clone() else { return };
        self.registry.do_send(room::RelayAnswer {
            room_id,
            sender_id: principal.user_id,
            target_user_id,
            sdp,
        });
    }

    fn handle_ice(
        &mut self,
        room_id: RoomId,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u32>,
        target_user_id: Option<UserId>,
    ) {
        let Some(principal) = self.principal.clone() else { return };
        self.registry.do_send(room::RelayIce {
            room_id,
            sender_id: principal.user_id,
            candidate,
            sdp_mid,
            sdp_m_line_index,
            target_user_id,
        });
    }

    fn handle_ice_batch(
        &mut self,
        room_id: RoomId,
        candidates: Vec<crate::protocol::IceCandidate>,
        target_user_id: Option<UserId>,
    ) {
        let Some(principal) = self.principal.clone() else { return };
        self.registry.do_send(room::RelayIceBatch {
            room_id,
            sender_id: principal.user_id,
            candidates,
            target_user_id,
        });
    }
}

impl Actor for Session {
    type Context = WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if !self.reserve_connection_slot() {
            log::warn!("rejecting connection: server at capacity");
            self.close_with(ctx, CloseCode::ServerAtCapacity);
            return;
        }
        self.start_heartbeat(ctx);
        self.arm_auth_timeout(ctx);
    }

    /// Disconnect cleanup: releases the capacity slot and, for every room
    /// this connection had joined, asks the registry to leave on its
    /// behalf — which also releases the floor if this connection held it.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if self.slot_reserved {
            self.connections.fetch_sub(1, Ordering::SeqCst);
        }
        if let Some(principal) = self.principal.take() {
            for room_id in self.rooms.drain() {
                self.registry.do_send(room::LeaveRoom { room_id, user_id: Arc::clone(&principal.user_id) });
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ProtocolError>> for Session {
    fn handle(&mut self, item: Result<ws::Message, ProtocolError>, ctx: &mut Self::Context) {
        let message = match item {
            Ok(message) => message,
            Err(err) => {
                log::warn!("websocket protocol error: {err}");
                ctx.stop();
                return;
            }
        };
        match message {
            ws::Message::Text(text) => self.on_frame(text.as_ref(), ctx),
            ws::Message::Ping(bytes) => ctx.pong(&bytes),
            ws::Message::Pong(_) => {
                self.is_alive = true;
                self.missed_heartbeats = 0;
            }
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Binary(_) | ws::Message::Continuation(_) | ws::Message::Nop => {}
        }
    }
}

impl Handler<SendFrame> for Session {
    type Result = ();

    fn handle(&mut self, msg: SendFrame, ctx: &mut Self::Context) -> Self::Result {
        self.send_envelope(ctx, msg.0);
    }
}

impl Handler<CloseWith> for Session {
    type Result = ();

    fn handle(&mut self, msg: CloseWith, ctx: &mut Self::Context) -> Self::Result {
        self.close_with(ctx, msg.0);
    }
}
