use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::task::{Context, Poll, ready};
use tokio::io::unix::AsyncFd;

use super::AddressFamily;

/// How the OS hands ICMP traffic to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// `SOCK_RAW`: IPv4 reads include the IP header, the identifier is ours.
    Raw,
    /// Unprivileged `SOCK_DGRAM` ICMP. Linux strips the IP header, rewrites
    /// the identifier and only delivers replies that match it. Darwin keeps
    /// the IP header and leaves the identifier alone.
    Datagram,
}

/// A non-blocking ICMP endpoint owned by a single session task.
pub trait EchoSocket: Send + 'static {
    fn kind(&self) -> SocketKind;

    fn send_to(&mut self, packet: &[u8], destination: &SockAddr) -> io::Result<usize>;

    /// Reads one datagram into `buf`, registering for readiness when none
    /// is queued.
    fn poll_recv(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>>;
}

/// Opens sockets on behalf of a session each time it starts.
pub trait SocketOpener: Send + 'static {
    type Socket: EchoSocket;

    fn open(&mut self, family: AddressFamily) -> io::Result<Self::Socket>;
}

/// Opens real ICMP sockets, preferring raw sockets and falling back to the
/// unprivileged datagram flavour when raw access is refused.
#[derive(Debug, Clone, Default)]
pub struct SystemSockets {
    ttl: Option<u32>,
}

impl SystemSockets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Option<u32>) -> Self {
        self.ttl = ttl;
        self
    }
}

impl SocketOpener for SystemSockets {
    type Socket = IcmpSocket;

    fn open(&mut self, family: AddressFamily) -> io::Result<IcmpSocket> {
        let socket = IcmpSocket::new(family)?;
        if let Some(ttl) = self.ttl {
            socket.set_ttl(ttl)?;
        }
        Ok(socket)
    }
}

pub struct IcmpSocket {
    fd: AsyncFd<Socket>,
    family: AddressFamily,
    kind: SocketKind,
}

impl IcmpSocket {
    /// Must be called from within a tokio runtime.
    pub fn new(family: AddressFamily) -> io::Result<Self> {
        let (domain, protocol) = match family {
            AddressFamily::V4 => (Domain::IPV4, Protocol::ICMPV4),
            AddressFamily::V6 => (Domain::IPV6, Protocol::ICMPV6),
        };

        let (socket, kind) = match Socket::new(domain, Type::RAW, Some(protocol)) {
            Ok(socket) => (socket, SocketKind::Raw),
            Err(raw_err) => {
                log::debug!("raw {} socket refused ({}), trying datagram ICMP", family, raw_err);
                let socket = Socket::new(domain, Type::DGRAM, Some(protocol)).map_err(|_| raw_err)?;
                (socket, SocketKind::Datagram)
            }
        };

        socket.set_nonblocking(true)?;
        log::debug!("opened {:?} {} ICMP socket", kind, family);

        Ok(Self {
            fd: AsyncFd::new(socket)?,
            family,
            kind,
        })
    }

    pub fn set_ttl(&self, ttl: u32) -> io::Result<()> {
        match self.family {
            AddressFamily::V6 => self.fd.get_ref().set_unicast_hops_v6(ttl),
            AddressFamily::V4 => self.fd.get_ref().set_ttl(ttl),
        }
    }
}

impl EchoSocket for IcmpSocket {
    fn kind(&self) -> SocketKind {
        self.kind
    }

    fn send_to(&mut self, packet: &[u8], destination: &SockAddr) -> io::Result<usize> {
        self.fd.get_ref().send_to(packet, destination)
    }

    fn poll_recv(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            match guard.try_io(|fd| {
                let mut socket: &Socket = fd.get_ref();
                socket.read(buf)
            }) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }
}
