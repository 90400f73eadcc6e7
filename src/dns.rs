use dns_lookup::lookup_host;
use socket2::SockAddr;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::PingError;
use crate::icmp::AddressFamily;

/// Which address families a name may resolve to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddressStyle {
    #[default]
    Any,
    ForceV4,
    ForceV6,
}

impl AddressStyle {
    pub fn from_flags(force_ipv4: bool, force_ipv6: bool) -> Self {
        match (force_ipv4, force_ipv6) {
            (true, false) => AddressStyle::ForceV4,
            (false, true) => AddressStyle::ForceV6,
            _ => AddressStyle::Any,
        }
    }

    pub fn accepts(self, ip: &IpAddr) -> bool {
        match self {
            AddressStyle::Any => true,
            AddressStyle::ForceV4 => ip.is_ipv4(),
            AddressStyle::ForceV6 => ip.is_ipv6(),
        }
    }
}

/// The destination a started session sends to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    addr: SocketAddr,
}

impl ResolvedAddress {
    pub fn new(ip: IpAddr) -> Self {
        Self {
            addr: SocketAddr::new(ip, 0),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.addr.ip())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The native `sockaddr` form handed to the OS on send.
    pub fn to_sock_addr(&self) -> SockAddr {
        SockAddr::from(self.addr)
    }
}

impl std::fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr.ip())
    }
}

/// Resolves `hostname`. Address literals are taken as-is; names go through
/// the system resolver on the blocking pool and the first candidate that
/// `style` accepts wins, in resolver order.
pub async fn resolve_hostname(hostname: &str, style: AddressStyle) -> Result<ResolvedAddress, PingError> {
    if hostname.is_empty() || hostname.contains('\0') {
        return Err(PingError::InvalidHostName(hostname.to_string()));
    }

    if let Ok(ip) = hostname.parse::<Ipv4Addr>() {
        return Ok(ResolvedAddress::new(IpAddr::V4(ip)));
    }
    if let Ok(ip) = hostname.parse::<Ipv6Addr>() {
        return Ok(ResolvedAddress::new(IpAddr::V6(ip)));
    }

    let candidates = tokio::task::spawn_blocking({
        let hostname = hostname.to_string();
        move || lookup_host(&hostname)
    })
    .await
    .map_err(|e| {
        log::warn!("resolver task for {} failed: {}", hostname, e);
        PingError::NoAddressFound(hostname.to_string())
    })?
    .map_err(|e| {
        log::debug!("lookup of {} failed: {}", hostname, e);
        PingError::NoAddressFound(hostname.to_string())
    })?;

    select_address(&candidates, style)
        .map(ResolvedAddress::new)
        .ok_or_else(|| PingError::NoAddressFound(hostname.to_string()))
}

fn select_address(candidates: &[IpAddr], style: AddressStyle) -> Option<IpAddr> {
    candidates.iter().find(|ip| style.accepts(ip)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ip_address_parsing() {
        let result = resolve_hostname("8.8.8.8", AddressStyle::Any).await.unwrap();
        assert_eq!(result.ip(), "8.8.8.8".parse::<IpAddr>().unwrap());
        assert_eq!(result.family(), AddressFamily::V4);

        let result = resolve_hostname("::1", AddressStyle::Any).await.unwrap();
        assert_eq!(result.family(), AddressFamily::V6);
    }

    #[tokio::test]
    async fn test_literal_bypasses_style_filter() {
        let result = resolve_hostname("127.0.0.1", AddressStyle::ForceV6).await.unwrap();
        assert_eq!(result.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_invalid_host_name() {
        assert!(matches!(
            resolve_hostname("", AddressStyle::Any).await,
            Err(PingError::InvalidHostName(_))
        ));
        assert!(matches!(
            resolve_hostname("bad\0name", AddressStyle::Any).await,
            Err(PingError::InvalidHostName(_))
        ));
    }

    #[tokio::test]
    async fn test_localhost_force_ipv4() {
        let result = resolve_hostname("localhost", AddressStyle::ForceV4).await.unwrap();
        assert!(result.ip().is_ipv4());
        assert!(result.ip().is_loopback());
    }

    #[test]
    fn test_select_address_respects_style_and_order() {
        let candidates: Vec<IpAddr> = vec![
            "2001:db8::1".parse().unwrap(),
            "192.0.2.1".parse().unwrap(),
            "192.0.2.2".parse().unwrap(),
        ];
        assert_eq!(select_address(&candidates, AddressStyle::Any), Some(candidates[0]));
        assert_eq!(select_address(&candidates, AddressStyle::ForceV4), Some(candidates[1]));
        assert_eq!(select_address(&candidates, AddressStyle::ForceV6), Some(candidates[0]));
        assert_eq!(select_address(&candidates[1..], AddressStyle::ForceV6), None);
    }

    #[test]
    fn test_style_from_flags() {
        assert_eq!(AddressStyle::from_flags(true, false), AddressStyle::ForceV4);
        assert_eq!(AddressStyle::from_flags(false, true), AddressStyle::ForceV6);
        assert_eq!(AddressStyle::from_flags(false, false), AddressStyle::Any);
    }

    #[test]
    fn test_resolved_address_sockaddr() {
        let address = ResolvedAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let sock_addr = address.to_sock_addr();
        assert!(sock_addr.len() > 0);
        assert_eq!(sock_addr.as_socket(), Some(address.socket_addr()));
        assert_eq!(address.to_string(), "127.0.0.1");
    }
}
