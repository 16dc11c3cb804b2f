//! Actix [`Message`] wrappers exchanged between [`super::actor::Session`]
//! and [`crate::room::RoomRegistry`].

use actix::dev::ToEnvelope;
use actix::{Actor, Addr, Handler, Message, Recipient};

use crate::protocol::Envelope;

/// One outbound wire frame addressed to a single connection. The room
/// registry uses this both for targeted relays and for room broadcasts
/// (one clone per member).
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct SendFrame(pub Envelope);

impl From<Envelope> for SendFrame {
    fn from(envelope: Envelope) -> Self {
        SendFrame(envelope)
    }
}

/// Forces a connection closed with a specific wire close code, used to evict
/// a replaced duplicate session (`REPLACED`) or enforce capacity.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CloseWith(pub crate::protocol::CloseCode);

/// Actor-agnostic handle the room registry holds for each member, so it
/// never needs to name the concrete `Session` actor type. Anything that can
/// answer `SendFrame` and `CloseWith`, the real WebSocket connection or a
/// test double with a plain `Context`, can back one.
#[derive(Clone)]
pub struct ConnHandle {
    pub send_frame: Recipient<SendFrame>,
    pub close_with: Recipient<CloseWith>,
}

impl ConnHandle {
    pub fn from_addr<A>(addr: Addr<A>) -> Self
    where
        A: Actor + Handler<SendFrame> + Handler<CloseWith>,
        A::Context: ToEnvelope<A, SendFrame> + ToEnvelope<A, CloseWith>,
    {
        Self {
            send_frame: addr.clone().recipient(),
            close_with: addr.recipient(),
        }
    }
}
