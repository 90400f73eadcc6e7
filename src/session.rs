//! The ping session: one destination, one socket, one sequence counter.
//!
//! All session state lives in a dedicated tokio task. The [`Session`] handle
//! only enqueues commands, so none of its methods wait on the network.
//! Outcomes arrive on the [`SessionEventReceiver`] returned at construction.

use rand::Rng;
use std::collections::HashMap;
use std::future::poll_fn;
use std::io;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};

use crate::dns::{AddressStyle, ResolvedAddress, resolve_hostname};
use crate::error::PingError;
use crate::event::{SessionEvent, SessionEventReceiver, SessionEventSender, session_event_channel};
use crate::icmp::{
    AddressFamily, EchoHeader, EchoSocket, SocketKind, SocketOpener, SystemSockets,
    build_echo_request, default_payload, ipv4_ttl, locate_icmp_offset,
};
use crate::sequence::SequenceCounter;

/// Large enough for any IPv4 header plus a jumbo-ish echo payload.
const RECV_BUFFER_LEN: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Started,
}

/// Called on the session task with the sequence number a send is about to
/// use, before the packet goes out.
pub(crate) type SequenceHook = Box<dyn FnOnce(u16) + Send>;

enum Command {
    SetAddressStyle(AddressStyle),
    Start,
    Send {
        payload: Option<Vec<u8>>,
        on_sequence: Option<SequenceHook>,
    },
    Stop,
    Settle(oneshot::Sender<SessionState>),
}

/// Random non-zero echo identifier.
pub fn generate_identifier() -> u16 {
    rand::thread_rng().gen_range(1..=u16::MAX)
}

/// Handle to a running session task. Dropping it shuts the task down and
/// closes the socket.
pub struct Session {
    host_name: String,
    identifier: u16,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl Session {
    /// Creates an idle session using real ICMP sockets. Must be called from
    /// within a tokio runtime.
    pub fn new(host_name: impl Into<String>) -> (Self, SessionEventReceiver) {
        Self::with_opener(host_name, SystemSockets::new())
    }

    pub fn with_opener<O: SocketOpener>(host_name: impl Into<String>, opener: O) -> (Self, SessionEventReceiver) {
        Self::with_identifier(host_name, generate_identifier(), opener)
    }

    pub fn with_identifier<O: SocketOpener>(
        host_name: impl Into<String>,
        identifier: u16,
        opener: O,
    ) -> (Self, SessionEventReceiver) {
        let host_name = host_name.into();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = session_event_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let task = SessionTask {
            host_name: host_name.clone(),
            identifier,
            style: AddressStyle::default(),
            opener,
            sequence: SequenceCounter::new(),
            active: None,
            events: event_tx,
            state: state_tx,
        };
        tokio::spawn(task.run(command_rx));

        let session = Self {
            host_name,
            identifier,
            commands: command_tx,
            state: state_rx,
        };
        (session, event_rx)
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    /// The state as of the last command the task finished.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Waits until every command queued so far has been handled and returns
    /// the resulting state.
    pub async fn settled_state(&self) -> SessionState {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Settle(tx)).is_err() {
            return SessionState::Idle;
        }
        rx.await.unwrap_or(SessionState::Idle)
    }

    /// Takes effect only while idle.
    pub fn set_address_style(&self, style: AddressStyle) {
        self.command(Command::SetAddressStyle(style));
    }

    pub fn start(&self) {
        self.command(Command::Start);
    }

    /// Sends one echo request, with a generated payload when `payload` is
    /// `None`. Silently dropped unless the session is started.
    pub fn send_ping(&self, payload: Option<Vec<u8>>) {
        self.command(Command::Send {
            payload,
            on_sequence: None,
        });
    }

    pub(crate) fn send_ping_with(&self, payload: Option<Vec<u8>>, on_sequence: SequenceHook) {
        self.command(Command::Send {
            payload,
            on_sequence: Some(on_sequence),
        });
    }

    pub fn stop(&self) {
        self.command(Command::Stop);
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!("session task for {} has already exited", self.host_name);
        }
    }
}

struct Active<S> {
    address: ResolvedAddress,
    socket: S,
    pending: HashMap<u16, Instant>,
}

struct SessionTask<O: SocketOpener> {
    host_name: String,
    identifier: u16,
    style: AddressStyle,
    opener: O,
    sequence: SequenceCounter,
    active: Option<Active<O::Socket>>,
    events: SessionEventSender,
    state: watch::Sender<SessionState>,
}

impl<O: SocketOpener> SessionTask<O> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                received = recv_datagram(&mut self.active, &mut buf) => match received {
                    Ok(0) => log::debug!("dropping empty read"),
                    Ok(n) => self.handle_datagram(&buf[..n]),
                    Err(e) => log::warn!("receive on {} socket failed: {}", self.host_name, e),
                },
            }
        }

        self.stop();
        log::debug!("session task for {} exited", self.host_name);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetAddressStyle(style) => {
                if self.active.is_none() {
                    self.style = style;
                } else {
                    log::debug!("ignoring address style change while started");
                }
            }
            Command::Start => self.start().await,
            Command::Send { payload, on_sequence } => self.send_ping(payload, on_sequence),
            Command::Stop => self.stop(),
            Command::Settle(reply) => {
                let _ = reply.send(*self.state.borrow());
            }
        }
    }

    async fn start(&mut self) {
        if self.active.is_some() {
            log::debug!("start ignored, session for {} already started", self.host_name);
            return;
        }

        let address = match resolve_hostname(&self.host_name, self.style).await {
            Ok(address) => address,
            Err(e) => return self.fail(e),
        };

        let socket = match self.opener.open(address.family()) {
            Ok(socket) => socket,
            Err(e) => return self.fail(PingError::SocketCreationFailed(e)),
        };

        log::info!(
            "pinging {} [{}] with identifier {:#06x}",
            self.host_name,
            address,
            self.identifier
        );
        self.active = Some(Active {
            address,
            socket,
            pending: HashMap::new(),
        });
        self.state.send_replace(SessionState::Started);
        self.emit(SessionEvent::Started(address));
    }

    fn send_ping(&mut self, payload: Option<Vec<u8>>, on_sequence: Option<SequenceHook>) {
        let Some(active) = self.active.as_mut() else {
            log::debug!("dropping send, session for {} is idle", self.host_name);
            return;
        };

        let sequence = self.sequence.next();
        let payload = payload.unwrap_or_else(|| default_payload(sequence));
        let packet = build_echo_request(active.address.family(), self.identifier, sequence, &payload);

        if let Some(hook) = on_sequence {
            hook(sequence);
        }

        active.pending.insert(sequence, Instant::now());
        let result = active.socket.send_to(&packet, &active.address.to_sock_addr());
        self.sequence.advance();

        let error = match result {
            Ok(n) if n == packet.len() => {
                log::debug!("sent {} bytes to {} seq={}", n, active.address, sequence);
                self.emit(SessionEvent::Sent { packet, sequence });
                return;
            }
            Ok(n) => io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {} of {} bytes", n, packet.len()),
            ),
            Err(e) => e,
        };

        log::warn!("send to {} seq={} failed: {}", active.address, sequence, error);
        active.pending.remove(&sequence);
        self.emit(SessionEvent::SendFailed {
            packet,
            sequence,
            error,
        });
    }

    fn handle_datagram(&mut self, datagram: &[u8]) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        let family = active.address.family();
        let kind = active.socket.kind();
        let Some((offset, header)) = match_reply(datagram, family, kind, self.identifier, &self.sequence) else {
            log::debug!("unexpected {} byte packet on {} socket", datagram.len(), family);
            self.emit(SessionEvent::UnexpectedPacket(datagram.to_vec()));
            return;
        };

        let rtt = active.pending.remove(&header.sequence).map(|sent_at| sent_at.elapsed());
        let ttl = if offset > 0 { ipv4_ttl(datagram) } else { None };
        log::debug!("reply from {} seq={} rtt={:?}", active.address, header.sequence, rtt);

        self.emit(SessionEvent::ReplyReceived {
            packet: datagram[offset..].to_vec(),
            sequence: header.sequence,
            rtt,
            ttl,
        });
    }

    fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        log::info!(
            "stopping session for {}, {} requests still outstanding",
            active.address,
            active.pending.len()
        );
        drop(active);
        self.state.send_replace(SessionState::Idle);
    }

    fn fail(&mut self, error: PingError) {
        log::warn!("session for {} failed: {}", self.host_name, error);
        self.emit(SessionEvent::Failed(error));
        self.stop();
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            log::trace!("event receiver for {} is gone", self.host_name);
        }
    }
}

async fn recv_datagram<S: EchoSocket>(active: &mut Option<Active<S>>, buf: &mut [u8]) -> io::Result<usize> {
    match active {
        Some(active) => poll_fn(|cx| active.socket.poll_recv(cx, buf)).await,
        None => std::future::pending().await,
    }
}

/// Linux rewrites the identifier of datagram ICMP sockets and only delivers
/// replies carrying it. Elsewhere the identifier we chose goes out unchanged.
const KERNEL_OWNS_DGRAM_IDENTIFIER: bool = cfg!(any(target_os = "linux", target_os = "android"));

fn starts_with_ipv4_header(datagram: &[u8]) -> bool {
    datagram.first().is_some_and(|b| b >> 4 == 4)
}

/// Checks that `datagram` is a reply to one of our requests. Returns where
/// the ICMP message starts and its header.
fn match_reply(
    datagram: &[u8],
    family: AddressFamily,
    kind: SocketKind,
    identifier: u16,
    sequence: &SequenceCounter,
) -> Option<(usize, EchoHeader)> {
    // Raw sockets always carry the IPv4 header. Datagram sockets carry it on
    // some platforms only; an echo reply never starts with a 4 nibble.
    let offset = match family {
        AddressFamily::V4 if kind == SocketKind::Raw || starts_with_ipv4_header(datagram) => {
            locate_icmp_offset(datagram)?
        }
        _ => 0,
    };
    let header = EchoHeader::decode(&datagram[offset..])?;

    let ours = header.identifier == identifier || (kind == SocketKind::Datagram && KERNEL_OWNS_DGRAM_IDENTIFIER);

    let valid = header.icmp_type == family.echo_reply_type()
        && header.code == 0
        && ours
        && sequence.accepts(header.sequence);
    valid.then_some((offset, header))
}
