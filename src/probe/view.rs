//! Bounds-checked access to received packet bytes.
//!
//! Every read goes through [`PacketView::bytes`], which fails with
//! [`DissectError::TruncatedPacket`] instead of reading past the buffer.
//! Offsets in errors are absolute, relative to the outermost buffer, so a
//! failure deep inside a quoted packet still points at the right byte.

use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{DissectError, Result};

/// Minimum IPv4 header size (IHL = 5)
pub const IPV4_MIN_HEADER_LEN: usize = 20;
/// Fixed IPv6 header size
pub const IPV6_HEADER_LEN: usize = 40;
/// ICMP and ICMPv6 header size (type, code, checksum, 32 bits of rest)
pub const ICMP_HEADER_LEN: usize = 8;
/// TCP header size without options
pub const TCP_HEADER_LEN: usize = 20;
/// UDP header size
pub const UDP_HEADER_LEN: usize = 8;
/// Bytes of a quoted TCP header we rely on (ports + sequence number).
/// RFC 792 only guarantees 8 bytes past the quoted IP header.
pub const TCP_QUOTE_LEN: usize = 8;

/// Read-only window over a received packet
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    data: &'a [u8],
    /// Absolute offset of `data[0]` within the outermost buffer
    origin: usize,
}

impl<'a> PacketView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, origin: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Absolute offset of this view within the outermost buffer
    pub fn origin(&self) -> usize {
        self.origin
    }

    /// Borrow `len` bytes at `offset`, or fail with `TruncatedPacket`
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(DissectError::TruncatedPacket {
                offset: self.origin + offset,
                needed: len,
                available: self.data.len().saturating_sub(offset),
            })
    }

    pub fn u8_at(&self, offset: usize) -> Result<u8> {
        Ok(self.bytes(offset, 1)?[0])
    }

    pub fn u16_at(&self, offset: usize) -> Result<u16> {
        let b = self.bytes(offset, 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32_at(&self, offset: usize) -> Result<u32> {
        let b = self.bytes(offset, 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn ipv4_at(&self, offset: usize) -> Result<Ipv4Addr> {
        let b = self.bytes(offset, 4)?;
        Ok(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
    }

    pub fn ipv6_at(&self, offset: usize) -> Result<Ipv6Addr> {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(self.bytes(offset, 16)?);
        Ok(Ipv6Addr::from(octets))
    }

    /// Sub-view of exactly `len` bytes starting at `offset`
    pub fn slice(&self, offset: usize, len: usize) -> Result<PacketView<'a>> {
        let data = self.bytes(offset, len)?;
        Ok(Self {
            data,
            origin: self.origin + offset,
        })
    }

    /// Sub-view from `offset` to the end of this view
    pub fn tail(&self, offset: usize) -> Result<PacketView<'a>> {
        let len = self.data.len().checked_sub(offset).ok_or(DissectError::TruncatedPacket {
            offset: self.origin + offset,
            needed: 0,
            available: 0,
        })?;
        self.slice(offset, len)
    }

    /// IP version nibble of the first byte
    pub fn ip_version(&self) -> Result<u8> {
        Ok(self.u8_at(0)? >> 4)
    }

    pub fn ipv4(&self) -> Result<Ipv4Header<'a>> {
        Ipv4Header::parse(*self)
    }

    pub fn ipv6(&self) -> Result<Ipv6Header<'a>> {
        Ipv6Header::parse(*self)
    }

    pub fn icmp(&self) -> Result<IcmpHeader> {
        IcmpHeader::parse(self)
    }

    pub fn tcp(&self) -> Result<TcpHeader> {
        TcpHeader::parse(self)
    }

    pub fn udp(&self) -> Result<UdpHeader> {
        UdpHeader::parse(self)
    }
}

/// IPv4 header whose fixed part and options are known to be in bounds
pub struct Ipv4Header<'a> {
    view: PacketView<'a>,
    packet: Ipv4Packet<'a>,
    header_len: usize,
}

impl<'a> Ipv4Header<'a> {
    fn parse(view: PacketView<'a>) -> Result<Self> {
        let fixed = view.bytes(0, IPV4_MIN_HEADER_LEN)?;
        // IHL below 5 is malformed; treat it as the minimum so we never step backwards
        let header_len = ((fixed[0] & 0x0F) as usize * 4).max(IPV4_MIN_HEADER_LEN);
        let data = view.bytes(0, header_len)?;
        let packet = Ipv4Packet::new(view.as_bytes()).ok_or(DissectError::TruncatedPacket {
            offset: view.origin(),
            needed: data.len(),
            available: view.len(),
        })?;
        Ok(Self {
            view,
            packet,
            header_len,
        })
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn total_length(&self) -> u16 {
        self.packet.get_total_length()
    }

    pub fn identification(&self) -> u16 {
        self.packet.get_identification()
    }

    /// Type-of-service byte (DSCP + ECN)
    pub fn tos(&self) -> u8 {
        (self.packet.get_dscp() << 2) | self.packet.get_ecn()
    }

    pub fn ttl(&self) -> u8 {
        self.packet.get_ttl()
    }

    pub fn protocol(&self) -> u8 {
        self.packet.get_next_level_protocol().0
    }

    pub fn source(&self) -> Ipv4Addr {
        self.packet.get_source()
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.packet.get_destination()
    }

    /// Everything after the header, options included
    pub fn payload(&self) -> Result<PacketView<'a>> {
        self.view.tail(self.header_len)
    }
}

/// Fixed 40-byte IPv6 header known to be in bounds
pub struct Ipv6Header<'a> {
    view: PacketView<'a>,
    packet: Ipv6Packet<'a>,
}

impl<'a> Ipv6Header<'a> {
    fn parse(view: PacketView<'a>) -> Result<Self> {
        view.bytes(0, IPV6_HEADER_LEN)?;
        let packet = Ipv6Packet::new(view.as_bytes()).ok_or(DissectError::TruncatedPacket {
            offset: view.origin(),
            needed: IPV6_HEADER_LEN,
            available: view.len(),
        })?;
        Ok(Self { view, packet })
    }

    pub fn payload_length(&self) -> u16 {
        self.packet.get_payload_length()
    }

    pub fn next_header(&self) -> u8 {
        self.packet.get_next_header().0
    }

    pub fn hop_limit(&self) -> u8 {
        self.packet.get_hop_limit()
    }

    pub fn source(&self) -> Ipv6Addr {
        self.packet.get_source()
    }

    pub fn destination(&self) -> Ipv6Addr {
        self.packet.get_destination()
    }

    pub fn payload(&self) -> Result<PacketView<'a>> {
        self.view.tail(IPV6_HEADER_LEN)
    }
}

/// ICMP / ICMPv6 header. Both share the same 8-byte layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    /// The 32-bit "rest of header" word (identifier/sequence, MTU, or unused + RFC 4884 length)
    pub rest: u32,
}

impl IcmpHeader {
    fn parse(view: &PacketView<'_>) -> Result<Self> {
        view.bytes(0, ICMP_HEADER_LEN)?;
        Ok(Self {
            icmp_type: view.u8_at(0)?,
            code: view.u8_at(1)?,
            checksum: view.u16_at(2)?,
            rest: view.u32_at(4)?,
        })
    }

    pub fn identifier(&self) -> u16 {
        (self.rest >> 16) as u16
    }

    pub fn sequence(&self) -> u16 {
        (self.rest & 0xFFFF) as u16
    }

    /// RFC 4884 original-datagram length (bits 16-23 of the rest word), in bytes
    pub fn extension_length(&self) -> usize {
        (((self.rest & 0x00FF_0000) >> 16) as usize) * 4
    }
}

/// The leading 8 bytes of a TCP header: ports and sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub source_port: u16,
    pub dest_port: u16,
    pub sequence: u32,
}

impl TcpHeader {
    fn parse(view: &PacketView<'_>) -> Result<Self> {
        view.bytes(0, TCP_QUOTE_LEN)?;
        Ok(Self {
            source_port: view.u16_at(0)?,
            dest_port: view.u16_at(2)?,
            sequence: view.u32_at(4)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub source_port: u16,
    pub dest_port: u16,
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    fn parse(view: &PacketView<'_>) -> Result<Self> {
        view.bytes(0, UDP_HEADER_LEN)?;
        Ok(Self {
            source_port: view.u16_at(0)?,
            dest_port: view.u16_at(2)?,
            length: view.u16_at(4)?,
            checksum: view.u16_at(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_in_bounds() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9a];
        let view = PacketView::new(&data);
        assert_eq!(view.u8_at(4).unwrap(), 0x9a);
        assert_eq!(view.u16_at(0).unwrap(), 0x1234);
        assert_eq!(view.u32_at(1).unwrap(), 0x3456_789a);
    }

    #[test]
    fn test_read_past_end_is_truncated() {
        let data = [0u8; 3];
        let view = PacketView::new(&data);
        assert_eq!(
            view.u32_at(0),
            Err(DissectError::TruncatedPacket {
                offset: 0,
                needed: 4,
                available: 3
            })
        );
        assert!(view.u8_at(3).is_err());
        assert!(view.bytes(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_slice_keeps_absolute_offsets() {
        let data = [0u8; 16];
        let view = PacketView::new(&data);
        let inner = view.slice(8, 4).unwrap();
        assert_eq!(inner.origin(), 8);
        assert_eq!(inner.len(), 4);
        match inner.u16_at(3) {
            Err(DissectError::TruncatedPacket { offset, .. }) => assert_eq!(offset, 11),
            other => panic!("expected truncation, got {:?}", other),
        }
        assert!(view.tail(16).unwrap().is_empty());
        assert!(view.tail(17).is_err());
    }

    #[test]
    fn test_ipv4_header_fields() {
        let mut packet = vec![0u8; 24];
        packet[0] = 0x46; // Version 4, IHL 6
        packet[1] = 0xB8; // TOS
        packet[2..4].copy_from_slice(&24u16.to_be_bytes());
        packet[4..6].copy_from_slice(&0x0A05u16.to_be_bytes());
        packet[8] = 57;
        packet[9] = 1;
        packet[12..16].copy_from_slice(&[192, 0, 2, 1]);
        packet[16..20].copy_from_slice(&[198, 51, 100, 7]);

        let view = PacketView::new(&packet);
        let ip = view.ipv4().unwrap();
        assert_eq!(ip.header_len(), 24);
        assert_eq!(ip.total_length(), 24);
        assert_eq!(ip.identification(), 0x0A05);
        assert_eq!(ip.tos(), 0xB8);
        assert_eq!(ip.ttl(), 57);
        assert_eq!(ip.protocol(), 1);
        assert_eq!(ip.source(), Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(ip.destination(), Ipv4Addr::new(198, 51, 100, 7));
        assert!(ip.payload().unwrap().is_empty());
    }

    #[test]
    fn test_ipv4_options_beyond_buffer() {
        let mut packet = vec![0u8; 20];
        packet[0] = 0x4F; // IHL 15 = 60 bytes, only 20 present
        assert!(PacketView::new(&packet).ipv4().is_err());
    }

    #[test]
    fn test_icmp_header_fields() {
        let data = [11, 0, 0xAB, 0xCD, 0x00, 0x20, 0x00, 0x00];
        let icmp = PacketView::new(&data).icmp().unwrap();
        assert_eq!(icmp.icmp_type, 11);
        assert_eq!(icmp.checksum, 0xABCD);
        assert_eq!(icmp.extension_length(), 128);
        assert_eq!(icmp.identifier(), 0x0020);
        assert_eq!(icmp.sequence(), 0);
    }

    #[test]
    fn test_short_transport_headers() {
        let data = [0u8; 7];
        let view = PacketView::new(&data);
        assert!(view.tcp().is_err());
        assert!(view.udp().is_err());
        assert!(view.icmp().is_err());
    }
}
