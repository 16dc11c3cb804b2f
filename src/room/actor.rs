//! A single [`Room`]: its member roster and its [`FloorController`] (C3 +
//! C4). This is plain state, not an actor — [`super::RoomRegistry`] owns a
//! `HashMap` of these and serializes all access to them through its own
//! mailbox, which is what gives per-room operations their serialization.

use std::sync::Arc;

use ahash::HashMap;

use crate::floor::FloorController;
use crate::protocol::{FloorStateDto, MemberInfo, RoomId, ServerMessage, UserId};
use crate::session::message::ConnHandle;

pub struct Member {
    pub display_name: Arc<str>,
    pub conn: ConnHandle,
}

pub struct Room {
    pub id: RoomId,
    pub members: HashMap<UserId, Member>,
    pub floor: FloorController,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            members: crate::utils::new_fast_hashmap(4),
            floor: FloorController::new(),
        }
    }

    pub fn roster(&self) -> Vec<MemberInfo> {
        self.members
            .iter()
            .map(|(user_id, member)| MemberInfo {
                user_id: Arc::clone(user_id),
                display_name: Arc::clone(&member.display_name),
            })
            .collect()
    }

    pub fn floor_dto(&mut self) -> FloorStateDto {
        match self.floor.state() {
            Some(grant) => FloorStateDto::Grant {
                holder_user_id: grant.holder_user_id,
                holder_display_name: grant.holder_display_name,
            },
            None => FloorStateDto::None,
        }
    }

    /// Sends `message` to every member except `except` (if given).
    pub fn broadcast(&self, message: ServerMessage, except: Option<&UserId>) {
        let envelope = crate::session::message::SendFrame(message.into());
        for (user_id, member) in self.members.iter() {
            if except.map_or(true, |skip| skip != user_id) {
                member.conn.send_frame.do_send(envelope.clone());
            }
        }
    }

    pub fn send_to(&self, user_id: &UserId, message: ServerMessage) -> bool {
        match self.members.get(user_id) {
            Some(member) => {
                member
                    .conn
                    .send_frame
                    .do_send(crate::session::message::SendFrame(message.into()));
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
