use std::time::Duration;
use tokio::sync::mpsc;

use crate::dns::ResolvedAddress;
use crate::error::PingError;

/// Everything a session reports back to its owner.
#[derive(Debug)]
pub enum SessionEvent {
    /// The host resolved and a socket is open.
    Started(ResolvedAddress),
    /// Start could not complete. The session is idle again.
    Failed(PingError),
    /// The whole request went out.
    Sent { packet: Vec<u8>, sequence: u16 },
    /// The request went out partially or not at all.
    SendFailed {
        packet: Vec<u8>,
        sequence: u16,
        error: std::io::Error,
    },
    /// A reply to one of our requests. `packet` is the ICMP message without
    /// any IP header. `rtt` is missing when the send time was not tracked.
    ReplyReceived {
        packet: Vec<u8>,
        sequence: u16,
        rtt: Option<Duration>,
        ttl: Option<u8>,
    },
    /// Anything else that arrived on the socket, exactly as read.
    UnexpectedPacket(Vec<u8>),
}

pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;
pub type SessionEventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub(crate) fn session_event_channel() -> (SessionEventSender, SessionEventReceiver) {
    mpsc::unbounded_channel()
}
