use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use super::AddressFamily;

pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

/// Size of the echo header on the wire.
pub const ECHO_HEADER_LEN: usize = 8;

/// Smallest IPv4 header (no options).
pub const IPV4_MIN_HEADER_LEN: usize = 20;

const IPPROTO_ICMP: u8 = 1;

/// The 8-byte ICMP echo request/reply header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

impl EchoHeader {
    /// An echo request for `family` with the checksum left at zero.
    pub fn echo_request(family: AddressFamily, identifier: u16, sequence: u16) -> Self {
        Self {
            icmp_type: family.echo_request_type(),
            code: 0,
            checksum: 0,
            identifier,
            sequence,
        }
    }

    /// Parses the first eight bytes of `data`. The checksum is taken verbatim.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < ECHO_HEADER_LEN {
            return None;
        }

        let mut cursor = Cursor::new(data);
        Some(Self {
            icmp_type: cursor.read_u8().ok()?,
            code: cursor.read_u8().ok()?,
            checksum: cursor.read_u16::<BigEndian>().ok()?,
            identifier: cursor.read_u16::<BigEndian>().ok()?,
            sequence: cursor.read_u16::<BigEndian>().ok()?,
        })
    }

    pub fn encode(&self) -> [u8; ECHO_HEADER_LEN] {
        let mut bytes = [0u8; ECHO_HEADER_LEN];
        self.write_to(&mut bytes[..]);
        bytes
    }

    fn write_to(&self, mut out: &mut [u8]) {
        // Writing into an 8-byte slice cannot run short.
        let _ = out.write_u8(self.icmp_type);
        let _ = out.write_u8(self.code);
        let _ = out.write_u16::<BigEndian>(self.checksum);
        let _ = out.write_u16::<BigEndian>(self.identifier);
        let _ = out.write_u16::<BigEndian>(self.sequence);
    }
}

/// Internet checksum (RFC 1071) over `data`.
///
/// An odd trailing byte is treated as the high byte of a final zero-padded
/// word. Empty input yields `0xFFFF`.
pub fn compute_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
        // Keep the accumulator from overflowing on very large buffers.
        if sum > 0xFFFF_0000 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
    }

    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// True when `data` carries a valid checksum in place.
pub fn verify_checksum(data: &[u8]) -> bool {
    compute_checksum(data) == 0
}

/// Finds where the ICMP message starts inside a raw IPv4 datagram.
///
/// Returns the IP header length in bytes when the datagram is IPv4, carries
/// ICMP, and still has room for an echo header past the IP options.
pub fn locate_icmp_offset(packet: &[u8]) -> Option<usize> {
    if packet.len() < IPV4_MIN_HEADER_LEN + ECHO_HEADER_LEN {
        return None;
    }

    let version = packet[0] >> 4;
    if version != 4 {
        return None;
    }

    if packet[9] != IPPROTO_ICMP {
        return None;
    }

    let header_len = ((packet[0] & 0x0F) as usize) * 4;
    if packet.len() < header_len + ECHO_HEADER_LEN {
        return None;
    }

    Some(header_len)
}

/// TTL of a received IPv4 datagram.
pub fn ipv4_ttl(packet: &[u8]) -> Option<u8> {
    if packet.len() < IPV4_MIN_HEADER_LEN || packet[0] >> 4 != 4 {
        return None;
    }
    Some(packet[8])
}

/// The filler sent when the caller supplies no payload: 56 bytes that vary
/// with the sequence number so replies are easy to eyeball in a capture.
pub fn default_payload(sequence: u16) -> Vec<u8> {
    format!("{:>28} bottles of beer on the wall", sequence % 100).into_bytes()
}

/// Assembles a complete echo request.
///
/// IPv4 requests get their checksum patched into bytes 2..4. IPv6 requests
/// keep a zero checksum because the stack fills it in over a pseudo-header.
pub fn build_echo_request(
    family: AddressFamily,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
) -> Vec<u8> {
    let header = EchoHeader::echo_request(family, identifier, sequence);

    let mut packet = Vec::with_capacity(ECHO_HEADER_LEN + payload.len());
    packet.extend_from_slice(&header.encode());
    packet.extend_from_slice(payload);

    if family == AddressFamily::V4 {
        let checksum = compute_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}
