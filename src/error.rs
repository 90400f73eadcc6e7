use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PingError {
    #[error("invalid host name: {0:?}")]
    InvalidHostName(String),

    #[error("no address found for host: {0}")]
    NoAddressFound(String),

    #[error("failed to create ICMP socket: {0}")]
    SocketCreationFailed(#[source] std::io::Error),

    #[error("failed to send echo request: {0}")]
    SendFailed(#[source] std::io::Error),

    /// A buffer too short to hold an echo header, see [`crate::PingReply::header`].
    /// The session itself reports such datagrams as unexpected packets.
    #[error("invalid ICMP packet")]
    InvalidPacket,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("too many outstanding requests (limit {0})")]
    TooManyOutstanding(usize),

    #[error("ping session stopped")]
    SessionStopped,
}

impl PingError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PingError::Timeout(_))
    }
}
