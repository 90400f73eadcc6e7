//! Asynchronous ICMP echo ("ping") sessions.
//!
//! [`Session`] is the event-driven core: start it, send requests, and read
//! [`SessionEvent`]s off its channel. [`Pinger`] layers one-call
//! request/reply semantics with timeouts on top.
//!
//! ```rust,no_run
//! use echoping::{Pinger, PingerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), echoping::PingError> {
//!     let pinger = Pinger::connect("127.0.0.1", PingerConfig::default()).await?;
//!     let reply = pinger.ping(None).await?;
//!     println!("seq={} rtt={:?}", reply.sequence, reply.rtt);
//!     Ok(())
//! }
//! ```

pub mod dns;
pub mod error;
pub mod event;
pub mod icmp;
pub mod pinger;
pub mod sequence;
pub mod session;
pub mod stats;

pub use dns::{AddressStyle, ResolvedAddress, resolve_hostname};
pub use error::PingError;
pub use event::{SessionEvent, SessionEventReceiver};
pub use icmp::{AddressFamily, EchoHeader, EchoSocket, SocketKind, SocketOpener, SystemSockets};
pub use pinger::{PingReply, Pinger, PingerConfig};
pub use session::{Session, SessionState};
