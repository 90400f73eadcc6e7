//! Request/response pinging on top of [`Session`].
//!
//! Each [`Pinger::ping`] registers a waiter under the sequence number the
//! session assigns, then races it against a timeout. A router task matches
//! session events to waiters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, oneshot, watch};
use tokio::task::JoinHandle;

use crate::dns::{AddressStyle, ResolvedAddress};
use crate::error::PingError;
use crate::event::{SessionEvent, SessionEventReceiver};
use crate::icmp::{ECHO_HEADER_LEN, EchoHeader, SocketOpener, SystemSockets};
use crate::session::{Session, SessionState};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_OUTSTANDING: usize = 64;

#[derive(Debug, Clone)]
pub struct PingerConfig {
    pub address_style: AddressStyle,
    /// How long each request waits for its reply.
    pub timeout: Duration,
    /// Requests allowed in flight at once. Extra requests fail immediately.
    pub max_outstanding: usize,
    /// Outgoing TTL / hop limit. Only applied to system sockets.
    pub ttl: Option<u32>,
}

impl Default for PingerConfig {
    fn default() -> Self {
        Self {
            address_style: AddressStyle::Any,
            timeout: DEFAULT_TIMEOUT,
            max_outstanding: DEFAULT_MAX_OUTSTANDING,
            ttl: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingReply {
    pub sequence: u16,
    /// The ICMP echo reply, header included.
    pub packet: Vec<u8>,
    pub rtt: Option<Duration>,
    pub ttl: Option<u8>,
}

impl PingReply {
    pub fn payload_len(&self) -> usize {
        self.packet.len().saturating_sub(ECHO_HEADER_LEN)
    }

    /// Decodes the echo header of the reply.
    pub fn header(&self) -> Result<EchoHeader, PingError> {
        EchoHeader::decode(&self.packet).ok_or(PingError::InvalidPacket)
    }
}

type Waiter = oneshot::Sender<Result<PingReply, PingError>>;
type Waiters = Arc<Mutex<HashMap<u16, Waiter>>>;

fn lock(waiters: &Waiters) -> MutexGuard<'_, HashMap<u16, Waiter>> {
    waiters.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Pinger {
    session: Session,
    address: ResolvedAddress,
    waiters: Waiters,
    permits: Arc<Semaphore>,
    max_outstanding: usize,
    timeout: Duration,
    router: JoinHandle<()>,
}

impl Pinger {
    /// Resolves `host`, opens a system ICMP socket and waits for the session
    /// to start.
    pub async fn connect(host: &str, config: PingerConfig) -> Result<Self, PingError> {
        let opener = SystemSockets::new().with_ttl(config.ttl);
        Self::connect_with(host, opener, config).await
    }

    pub async fn connect_with<O: SocketOpener>(
        host: &str,
        opener: O,
        config: PingerConfig,
    ) -> Result<Self, PingError> {
        let (session, mut events) = Session::with_opener(host, opener);
        session.set_address_style(config.address_style);
        session.start();

        let address = loop {
            match events.recv().await {
                Some(SessionEvent::Started(address)) => break address,
                Some(SessionEvent::Failed(error)) => return Err(error),
                Some(other) => log::debug!("ignoring {:?} before start", other),
                None => return Err(PingError::SessionStopped),
            }
        };

        let waiters = Waiters::default();
        let router = tokio::spawn(route_events(events, session.subscribe_state(), waiters.clone()));

        Ok(Self {
            session,
            address,
            waiters,
            permits: Arc::new(Semaphore::new(config.max_outstanding)),
            max_outstanding: config.max_outstanding,
            timeout: config.timeout,
            router,
        })
    }

    pub fn address(&self) -> ResolvedAddress {
        self.address
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn outstanding(&self) -> usize {
        lock(&self.waiters).len()
    }

    /// Sends one echo request and waits for its reply.
    pub async fn ping(&self, payload: Option<Vec<u8>>) -> Result<PingReply, PingError> {
        let _permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| PingError::TooManyOutstanding(self.max_outstanding))?;

        self.forget_abandoned();

        let (tx, rx) = oneshot::channel();
        let waiters = self.waiters.clone();
        self.session.send_ping_with(
            payload,
            Box::new(move |sequence| {
                if lock(&waiters).insert(sequence, tx).is_some() {
                    log::warn!("replaced a stale waiter for seq={}", sequence);
                }
            }),
        );

        let outcome = tokio::time::timeout(self.timeout, rx).await;
        match outcome {
            Ok(Ok(result)) => result,
            // The session dropped the request or cancelled every waiter.
            Ok(Err(_)) => Err(PingError::SessionStopped),
            Err(_) => {
                self.forget_abandoned();
                Err(PingError::Timeout(self.timeout))
            }
        }
    }

    /// Stops the session. Every outstanding [`Pinger::ping`] resolves with
    /// [`PingError::SessionStopped`].
    pub fn stop(&self) {
        self.session.stop();
    }

    /// Drops waiters whose caller has gone away, timed out or was cancelled.
    fn forget_abandoned(&self) {
        lock(&self.waiters).retain(|_, waiter| !waiter.is_closed());
    }
}

impl Drop for Pinger {
    fn drop(&mut self) {
        self.router.abort();
    }
}

async fn route_events(mut events: SessionEventReceiver, mut state: watch::Receiver<SessionState>, waiters: Waiters) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => dispatch(event, &waiters),
                None => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                if *state.borrow_and_update() == SessionState::Idle {
                    cancel_all(&waiters);
                }
            }
        }
    }
    cancel_all(&waiters);
}

fn dispatch(event: SessionEvent, waiters: &Waiters) {
    match event {
        SessionEvent::ReplyReceived {
            packet,
            sequence,
            rtt,
            ttl,
        } => {
            let reply = PingReply {
                sequence,
                packet,
                rtt,
                ttl,
            };
            match lock(waiters).remove(&sequence) {
                Some(waiter) => {
                    let _ = waiter.send(Ok(reply));
                }
                None => log::debug!("late or duplicate reply seq={}", sequence),
            }
        }
        SessionEvent::SendFailed { sequence, error, .. } => {
            if let Some(waiter) = lock(waiters).remove(&sequence) {
                let _ = waiter.send(Err(PingError::SendFailed(error)));
            }
        }
        SessionEvent::Sent { sequence, .. } => log::trace!("request seq={} on the wire", sequence),
        SessionEvent::UnexpectedPacket(raw) => log::debug!("ignoring unexpected {} byte packet", raw.len()),
        SessionEvent::Started(address) => log::info!("session restarted for {}", address),
        SessionEvent::Failed(error) => {
            log::warn!("session failed: {}", error);
            cancel_all(waiters);
        }
    }
}

fn cancel_all(waiters: &Waiters) {
    let cancelled = std::mem::take(&mut *lock(waiters));
    if !cancelled.is_empty() {
        log::debug!("cancelling {} outstanding requests", cancelled.len());
    }
    // Dropping the senders wakes each caller with SessionStopped.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icmp::socket::tests::{MockNetwork, OnOpen, OnSend};
    use crate::icmp::{AddressFamily, default_payload};

    fn config(timeout: Duration, max_outstanding: usize) -> PingerConfig {
        PingerConfig {
            address_style: AddressStyle::ForceV4,
            timeout,
            max_outstanding,
            ttl: None,
        }
    }

    #[tokio::test]
    async fn test_ping_receives_reply() {
        let network = MockNetwork::echoing();
        let pinger = Pinger::connect_with("127.0.0.1", network.clone(), PingerConfig::default())
            .await
            .unwrap();
        assert_eq!(pinger.address().family(), AddressFamily::V4);

        let first = pinger.ping(None).await.unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.header().unwrap().sequence, 0);
        assert!(first.rtt.is_some());
        assert_eq!(first.payload_len(), default_payload(0).len());
        assert_eq!(first.ttl, Some(64));

        let second = pinger.ping(Some(vec![0x61; 32])).await.unwrap();
        assert_eq!(second.sequence, 1);
        assert_eq!(second.payload_len(), 32);
        assert_eq!(pinger.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_pings_use_distinct_sequences() {
        let network = MockNetwork::echoing();
        let pinger = Pinger::connect_with("127.0.0.1", network, PingerConfig::default())
            .await
            .unwrap();

        let (a, b, c) = tokio::join!(pinger.ping(None), pinger.ping(None), pinger.ping(None));
        let mut sequences = vec![a.unwrap().sequence, b.unwrap().sequence, c.unwrap().sequence];
        sequences.sort();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_ping_times_out_without_reply() {
        let network = MockNetwork::new(OnOpen::Succeed, OnSend::ReturnDefault);
        let pinger = Pinger::connect_with("127.0.0.1", network.clone(), config(Duration::from_millis(50), 4))
            .await
            .unwrap();

        let result = pinger.ping(None).await;
        assert!(matches!(result, Err(PingError::Timeout(_))));
        assert_eq!(pinger.outstanding(), 0);
        assert_eq!(network.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_resolves_waiter() {
        let network = MockNetwork::new(OnOpen::Succeed, OnSend::ReturnErr);
        let pinger = Pinger::connect_with("127.0.0.1", network, PingerConfig::default())
            .await
            .unwrap();

        assert!(matches!(pinger.ping(None).await, Err(PingError::SendFailed(_))));
    }

    #[tokio::test]
    async fn test_cap_rejects_newest_request() {
        let network = MockNetwork::new(OnOpen::Succeed, OnSend::ReturnDefault);
        let pinger = Pinger::connect_with("127.0.0.1", network, config(Duration::from_millis(200), 1))
            .await
            .unwrap();

        let (first, second) = tokio::join!(pinger.ping(None), async {
            tokio::task::yield_now().await;
            pinger.ping(None).await
        });
        assert!(matches!(first, Err(PingError::Timeout(_))));
        assert!(matches!(second, Err(PingError::TooManyOutstanding(1))));
    }

    #[tokio::test]
    async fn test_stop_cancels_outstanding_requests() {
        let network = MockNetwork::new(OnOpen::Succeed, OnSend::ReturnDefault);
        let pinger = Pinger::connect_with("127.0.0.1", network, config(Duration::from_secs(5), 4))
            .await
            .unwrap();

        let (result, ()) = tokio::join!(pinger.ping(None), async {
            while pinger.outstanding() == 0 {
                tokio::task::yield_now().await;
            }
            pinger.stop();
        });
        assert!(matches!(result, Err(PingError::SessionStopped)));

        // Once stopped, requests are dropped by the session.
        assert!(matches!(pinger.ping(None).await, Err(PingError::SessionStopped)));
    }

    #[test]
    fn test_truncated_reply_header_is_invalid() {
        let reply = PingReply {
            sequence: 0,
            packet: vec![0, 0, 0],
            rtt: None,
            ttl: None,
        };
        assert!(matches!(reply.header(), Err(PingError::InvalidPacket)));
        assert_eq!(reply.payload_len(), 0);
    }

    #[tokio::test]
    async fn test_connect_reports_start_failure() {
        let network = MockNetwork::new(OnOpen::Fail, OnSend::ReturnDefault);
        let result = Pinger::connect_with("127.0.0.1", network, PingerConfig::default()).await;
        assert!(matches!(result, Err(PingError::SocketCreationFailed(_))));
    }
}
