//! Room Registry (C3) and Floor Controller wiring (C4): a single actor owns
//! every [`Room`] and serializes all join/leave/floor/relay operations
//! through its mailbox. Per-room serialization falls out of this for free —
//! two requests for the same room can never interleave, because both are
//! handled on the registry's single-threaded mailbox.
//!
//! Broadcasts are dispatched with `do_send` to each member's own mailbox, so
//! the registry never blocks on a transport write while holding room state.

pub mod actor;

use std::sync::Arc;

use actix::{Actor, AsyncContext, Context, Handler, Message};
use ahash::HashMap;

use crate::config::Settings;
use crate::error::{FloorError, RelayError, RoomError};
use crate::floor::FloorGrant;
use crate::protocol::{FloorStateDto, IceCandidate, RoomId, ServerMessage, UserId};
use crate::session::message::{CloseWith, ConnHandle, SendFrame};
use actor::{Member, Room};

pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    settings: Arc<Settings>,
}

impl RoomRegistry {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            rooms: crate::utils::new_fast_hashmap(64),
            settings,
        }
    }

    fn room_mut(&mut self, room_id: &RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    fn drop_if_empty(&mut self, room_id: &RoomId) {
        if self.rooms.get(room_id).is_some_and(Room::is_empty) {
            self.rooms.remove(room_id);
        }
    }

    fn sweep_floor_expiry(&mut self) {
        for room in self.rooms.values_mut() {
            if room.floor.expire_if_past_ttl() {
                room.broadcast(
                    ServerMessage::FloorState {
                        room_id: Arc::clone(&room.id),
                        state: FloorStateDto::None,
                    },
                    None,
                );
            }
        }
    }
}

impl Actor for RoomRegistry {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let interval = self.settings.heartbeat_interval();
        ctx.run_interval(interval, |act, _ctx| act.sweep_floor_expiry());
    }
}

pub struct JoinRoom {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub display_name: Arc<str>,
    pub conn: ConnHandle,
}

impl Message for JoinRoom {
    type Result = Result<(), RoomError>;
}

impl Handler<JoinRoom> for RoomRegistry {
    type Result = Result<(), RoomError>;

    fn handle(&mut self, msg: JoinRoom, _ctx: &mut Self::Context) -> Self::Result {
        let cap = self.settings.max_connections_per_room;
        let room = self
            .rooms
            .entry(Arc::clone(&msg.room_id))
            .or_insert_with(|| Room::new(Arc::clone(&msg.room_id)));

        if let Some(prior) = room.members.get(&msg.user_id) {
            log::info!(
                "evicting prior connection for user {} in room {} (reconnect)",
                msg.user_id,
                msg.room_id
            );
            prior
                .conn
                .close_with
                .do_send(CloseWith(crate::protocol::CloseCode::Replaced));
            room.members.remove(&msg.user_id);
            room.broadcast(
                ServerMessage::UserLeft {
                    room_id: Arc::clone(&msg.room_id),
                    user_id: Arc::clone(&msg.user_id),
                },
                None,
            );
        } else if room.members.len() >= cap {
            return Err(RoomError::RoomFull);
        }

        room.members.insert(
            Arc::clone(&msg.user_id),
            Member {
                display_name: Arc::clone(&msg.display_name),
                conn: msg.conn.clone(),
            },
        );

        room.broadcast(
            ServerMessage::UserJoined {
                room_id: Arc::clone(&msg.room_id),
                user_id: Arc::clone(&msg.user_id),
                display_name: Arc::clone(&msg.display_name),
            },
            Some(&msg.user_id),
        );

        let floor = room.floor_dto();
        msg.conn.send_frame.do_send(SendFrame(
            ServerMessage::RoomState {
                room_id: Arc::clone(&msg.room_id),
                members: room.roster(),
                floor,
            }
            .into(),
        ));

        Ok(())
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct LeaveRoom {
    pub room_id: RoomId,
    pub user_id: UserId,
}

impl Handler<LeaveRoom> for RoomRegistry {
    type Result = ();

    fn handle(&mut self, msg: LeaveRoom, _ctx: &mut Self::Context) -> Self::Result {
        let Some(room) = self.room_mut(&msg.room_id) else {
            return;
        };
        if room.members.remove(&msg.user_id).is_none() {
            return;
        }
        room.broadcast(
            ServerMessage::UserLeft {
                room_id: Arc::clone(&msg.room_id),
                user_id: Arc::clone(&msg.user_id),
            },
            None,
        );
        if room.floor.force_release(&msg.user_id) {
            room.broadcast(
                ServerMessage::FloorState {
                    room_id: Arc::clone(&msg.room_id),
                    state: FloorStateDto::None,
                },
                None,
            );
        }
        self.drop_if_empty(&msg.room_id);
    }
}

pub struct RequestFloor {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub display_name: Arc<str>,
}

impl Message for RequestFloor {
    type Result = Result<FloorGrant, FloorError>;
}

impl Handler<RequestFloor> for RoomRegistry {
    type Result = Result<FloorGrant, FloorError>;

    fn handle(&mut self, msg: RequestFloor, _ctx: &mut Self::Context) -> Self::Result {
        let ttl = self.settings.floor_ttl();
        let Some(room) = self.room_mut(&msg.room_id) else {
            return Err(FloorError::RoomNotFound);
        };
        let grant = room
            .floor
            .request(Arc::clone(&msg.user_id), Arc::clone(&msg.display_name), ttl)?;
        room.broadcast(
            ServerMessage::FloorState {
                room_id: Arc::clone(&msg.room_id),
                state: FloorStateDto::Grant {
                    holder_user_id: Arc::clone(&grant.holder_user_id),
                    holder_display_name: Arc::clone(&grant.holder_display_name),
                },
            },
            None,
        );
        Ok(grant)
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct ReleaseFloor {
    pub room_id: RoomId,
    pub user_id: UserId,
}

impl Handler<ReleaseFloor> for RoomRegistry {
    type Result = ();

    fn handle(&mut self, msg: ReleaseFloor, _ctx: &mut Self::Context) -> Self::Result {
        let Some(room) = self.room_mut(&msg.room_id) else {
            return;
        };
        if room.floor.release(&msg.user_id) {
            room.broadcast(
                ServerMessage::FloorState {
                    room_id: Arc::clone(&msg.room_id),
                    state: FloorStateDto::None,
                },
                None,
            );
        }
    }
}

pub struct RelayOffer {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sdp: String,
    pub target_user_id: Option<UserId>,
}

impl Message for RelayOffer {
    type Result = Result<(), RelayError>;
}

impl Handler<RelayOffer> for RoomRegistry {
    type Result = Result<(), RelayError>;

    fn handle(&mut self, msg: RelayOffer, _ctx: &mut Self::Context) -> Self::Result {
        let Some(room) = self.room_mut(&msg.room_id) else {
            return Err(RelayError::NotFloorHolder);
        };
        if !room.floor.has_floor(&msg.sender_id) {
            return Err(RelayError::NotFloorHolder);
        }
        let frame = ServerMessage::WebrtcOffer {
            room_id: Arc::clone(&msg.room_id),
            sdp: msg.sdp,
            from_user_id: Arc::clone(&msg.sender_id),
        };
        match &msg.target_user_id {
            Some(target) => {
                room.send_to(target, frame);
            }
            None => room.broadcast(frame, Some(&msg.sender_id)),
        }
        Ok(())
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct RelayAnswer {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub target_user_id: UserId,
    pub sdp: String,
}

impl Handler<RelayAnswer> for RoomRegistry {
    type Result = ();

    fn handle(&mut self, msg: RelayAnswer, _ctx: &mut Self::Context) -> Self::Result {
        let Some(room) = self.room_mut(&msg.room_id) else {
            return;
        };
        room.send_to(
            &msg.target_user_id,
            ServerMessage::WebrtcAnswer {
                room_id: Arc::clone(&msg.room_id),
                sdp: msg.sdp,
                from_user_id: msg.sender_id,
            },
        );
    }
}

pub struct RelayIce {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u32>,
    pub target_user_id: Option<UserId>,
}

impl Message for RelayIce {
    type Result = ();
}

impl Handler<RelayIce> for RoomRegistry {
    type Result = ();

    fn handle(&mut self, msg: RelayIce, _ctx: &mut Self::Context) -> Self::Result {
        let Some(room) = self.room_mut(&msg.room_id) else {
            return;
        };
        let frame = ServerMessage::WebrtcIce {
            room_id: Arc::clone(&msg.room_id),
            candidate: msg.candidate,
            sdp_mid: msg.sdp_mid,
            sdp_m_line_index: msg.sdp_m_line_index,
            from_user_id: Arc::clone(&msg.sender_id),
        };
        match &msg.target_user_id {
            Some(target) => {
                room.send_to(target, frame);
            }
            None => room.broadcast(frame, Some(&msg.sender_id)),
        }
    }
}

pub struct RelayIceBatch {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub candidates: Vec<IceCandidate>,
    pub target_user_id: Option<UserId>,
}

impl Message for RelayIceBatch {
    type Result = ();
}

impl Handler<RelayIceBatch> for RoomRegistry {
    type Result = ();

    fn handle(&mut self, msg: RelayIceBatch, _ctx: &mut Self::Context) -> Self::Result {
        let Some(room) = self.room_mut(&msg.room_id) else {
            return;
        };
        let frame = ServerMessage::WebrtcIceBatch {
            room_id: Arc::clone(&msg.room_id),
            candidates: msg.candidates,
            from_user_id: Arc::clone(&msg.sender_id),
        };
        match &msg.target_user_id {
            Some(target) => {
                room.send_to(target, frame);
            }
            None => room.broadcast(frame, Some(&msg.sender_id)),
        }
    }
}

/// Disconnect cleanup (C2/C3): the connection enumerates its own joined-room
/// set and asks the registry to leave each one, breaking the Connection/Room
/// reference cycle by storing ids rather than pointers. This reuses
/// `LeaveRoom`'s handler, which already covers floor
/// release-while-holding.
pub type DisconnectLeave = LeaveRoom;

#[derive(Message)]
#[rtype(result = "RegistryStats")]
pub struct GetStats;

pub struct RegistryStats {
    pub room_count: usize,
}

impl actix::MessageResponse<RoomRegistry, GetStats> for RegistryStats {
    fn handle(
        self,
        _ctx: &mut Context<RoomRegistry>,
        tx: Option<actix::dev::OneshotSender<<GetStats as Message>::Result>>,
    ) {
        if let Some(tx) = tx {
            let _ = tx.send(self);
        }
    }
}

impl Handler<GetStats> for RoomRegistry {
    type Result = RegistryStats;

    fn handle(&mut self, _msg: GetStats, _ctx: &mut Self::Context) -> Self::Result {
        RegistryStats {
            room_count: self.rooms.len(),
        }
    }
}
