//! Floor Controller (C4): the pure grant/release/expiry state machine for a
//! single room's speaking slot. Kept free of actor/transport concerns so the
//! arbitration rules can be unit tested in isolation; `crate::room::actor`
//! wires this into the per-room actor's mailbox, which is what gives
//! request/release their required per-room serialization.

use std::time::{Duration, Instant};

use crate::error::FloorError;
use crate::protocol::UserId;

#[derive(Debug, Clone)]
pub struct FloorGrant {
    pub holder_user_id: UserId,
    pub holder_display_name: std::sync::Arc<str>,
    pub granted_at: Instant,
    pub expires_at: Instant,
}

#[derive(Default)]
pub struct FloorController {
    grant: Option<FloorGrant>,
}

impl FloorController {
    pub fn new() -> Self {
        Self { grant: None }
    }

    /// Lazily expires a stale grant, treating it as if it were absent.
    fn live_grant(&mut self) -> Option<&FloorGrant> {
        if let Some(grant) = &self.grant {
            if Instant::now() >= grant.expires_at {
                self.grant = None;
            }
        }
        self.grant.as_ref()
    }

    pub fn request(
        &mut self,
        holder_user_id: UserId,
        holder_display_name: std::sync::Arc<str>,
        ttl: Duration,
    ) -> Result<FloorGrant, FloorError> {
        if self.live_grant().is_some() {
            return Err(FloorError::AlreadyHeld);
        }
        let now = Instant::now();
        let grant = FloorGrant {
            holder_user_id,
            holder_display_name,
            granted_at: now,
            expires_at: now + ttl,
        };
        self.grant = Some(grant.clone());
        Ok(grant)
    }

    /// Releases the floor if `user_id` is the current holder. Returns
    /// `true` if a grant was actually cleared (broadcast-worthy); `false`
    /// is a silent no-op, per the idempotent-release invariant.
    pub fn release(&mut self, user_id: &UserId) -> bool {
        match &self.grant {
            Some(grant) if &grant.holder_user_id == user_id => {
                self.grant = None;
                true
            }
            _ => false,
        }
    }

    /// Eager expiry driven by the heartbeat sweep. Returns `true` if a
    /// grant was cleared because it had passed `expires_at`.
    pub fn expire_if_past_ttl(&mut self) -> bool {
        if let Some(grant) = &self.grant {
            if Instant::now() >= grant.expires_at {
                self.grant = None;
                return true;
            }
        }
        false
    }

    /// Forces a release regardless of TTL, used when the holder disconnects
    /// or leaves the room. Returns `true` if a grant was cleared.
    pub fn force_release(&mut self, user_id: &UserId) -> bool {
        self.release(user_id)
    }

    pub fn has_floor(&mut self, user_id: &UserId) -> bool {
        self.live_grant()
            .map(|grant| &grant.holder_user_id == user_id)
            .unwrap_or(false)
    }

    pub fn state(&mut self) -> Option<FloorGrant> {
        self.live_grant().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn user(id: &str) -> UserId {
        Arc::from(id)
    }

    #[test]
    fn grant_then_reject_second_requester() {
        let mut floor = FloorController::new();
        assert!(floor
            .request(user("u1"), Arc::from("Alice"), Duration::from_secs(60))
            .is_ok());
        let err = floor
            .request(user("u2"), Arc::from("Bob"), Duration::from_secs(60))
            .unwrap_err();
        assert_eq!(err, FloorError::AlreadyHeld);
    }

    #[test]
    fn release_by_non_holder_is_noop() {
        let mut floor = FloorController::new();
        floor
            .request(user("u1"), Arc::from("Alice"), Duration::from_secs(60))
            .unwrap();
        assert!(!floor.release(&user("u2")));
        assert!(floor.has_floor(&user("u1")));
    }

    #[test]
    fn release_by_holder_clears_grant() {
        let mut floor = FloorController::new();
        floor
            .request(user("u1"), Arc::from("Alice"), Duration::from_secs(60))
            .unwrap();
        assert!(floor.release(&user("u1")));
        assert!(floor.state().is_none());
    }

    #[test]
    fn lazy_expiry_allows_new_grant_after_ttl() {
        let mut floor = FloorController::new();
        floor
            .request(user("u1"), Arc::from("Alice"), Duration::from_millis(1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let granted = floor.request(user("u2"), Arc::from("Bob"), Duration::from_secs(60));
        assert!(granted.is_ok());
    }

    #[test]
    fn eager_expiry_reports_clearing_only_once() {
        let mut floor = FloorController::new();
        floor
            .request(user("u1"), Arc::from("Alice"), Duration::from_millis(1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(floor.expire_if_past_ttl());
        assert!(!floor.expire_if_past_ttl());
    }
}
