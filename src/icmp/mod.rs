pub mod packet;
pub mod socket;

pub use packet::*;
pub use socket::*;

use std::net::IpAddr;

/// IP version a session talks over. Picks the ICMP flavour and type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    pub fn echo_request_type(self) -> u8 {
        match self {
            AddressFamily::V4 => ICMP_ECHO_REQUEST,
            AddressFamily::V6 => ICMPV6_ECHO_REQUEST,
        }
    }

    pub fn echo_reply_type(self) -> u8 {
        match self {
            AddressFamily::V4 => ICMP_ECHO_REPLY,
            AddressFamily::V6 => ICMPV6_ECHO_REPLY,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}
