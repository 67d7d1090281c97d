//! Locating the transport header inside a quoted IPv6 packet.
//!
//! Only one 8-byte extension header (hop-by-hop, destination options or
//! fragment) is unwound. A second extension header behind it is reported as
//! an unusable quote instead of being misread as a transport header.

use crate::error::{DissectError, Result};
use crate::probe::timestamp::{IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP};
use crate::probe::view::{ICMP_HEADER_LEN, IPV6_HEADER_LEN, PacketView, TCP_HEADER_LEN, UDP_HEADER_LEN};

// IPv6 Next Header values for extension headers
pub const NH_HOP_BY_HOP: u8 = 0;
pub const NH_ROUTING: u8 = 43;
pub const NH_FRAGMENT: u8 = 44;
pub const NH_DEST_OPTS: u8 = 60;

/// Size we assume for the single unwound extension header
pub const EXTENSION_HEADER_LEN: usize = 8;

/// Where the probe's transport header sits within a quoted IPv6 packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLocation {
    /// Transport protocol (TCP, UDP or ICMPv6)
    pub next_header: u8,
    /// Offset of the transport header from the start of the quoted IPv6 header
    pub offset: usize,
    /// Extension header that was skipped, if any
    pub skipped: Option<u8>,
}

impl TransportLocation {
    pub fn header_len(&self) -> usize {
        match self.next_header {
            IPPROTO_TCP => TCP_HEADER_LEN,
            IPPROTO_UDP => UDP_HEADER_LEN,
            _ => ICMP_HEADER_LEN,
        }
    }

    /// Offset of the scan payload from the start of the quoted IPv6 header
    pub fn payload_offset(&self) -> usize {
        self.offset + self.header_len()
    }
}

fn is_unwound_extension(next_header: u8) -> bool {
    matches!(next_header, NH_HOP_BY_HOP | NH_FRAGMENT | NH_DEST_OPTS)
}

fn is_extension(next_header: u8) -> bool {
    is_unwound_extension(next_header) || next_header == NH_ROUTING
}

/// Walk from a quoted IPv6 header to the probe's transport header
pub fn locate_transport(quote: &PacketView<'_>) -> Result<TransportLocation> {
    let ip = quote.ipv6()?;
    let mut next_header = ip.next_header();
    let mut offset = IPV6_HEADER_LEN;
    let mut skipped = None;

    if is_unwound_extension(next_header) {
        skipped = Some(next_header);
        // First byte of every extension header is its own Next Header
        next_header = quote.u8_at(offset)?;
        offset += EXTENSION_HEADER_LEN;
        if is_extension(next_header) {
            return Err(DissectError::UnknownQuoteProtocol(Some(next_header)));
        }
    }

    match next_header {
        IPPROTO_TCP | IPPROTO_UDP | IPPROTO_ICMPV6 => Ok(TransportLocation {
            next_header,
            offset,
            skipped,
        }),
        other => Err(DissectError::UnknownQuoteProtocol(Some(other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quoted_ipv6(next_header: u8, extra: &[u8]) -> Vec<u8> {
        let mut quote = vec![0u8; IPV6_HEADER_LEN];
        quote[0] = 0x60;
        quote[6] = next_header;
        quote[7] = 1;
        quote.extend_from_slice(extra);
        quote
    }

    #[test]
    fn test_direct_transport() {
        let quote = quoted_ipv6(IPPROTO_UDP, &[0u8; 8]);
        let loc = locate_transport(&PacketView::new(&quote)).unwrap();
        assert_eq!(loc.next_header, IPPROTO_UDP);
        assert_eq!(loc.offset, 40);
        assert_eq!(loc.skipped, None);
        assert_eq!(loc.payload_offset(), 48);
    }

    #[test]
    fn test_single_extension_unwound() {
        for ext in [NH_HOP_BY_HOP, NH_FRAGMENT, NH_DEST_OPTS] {
            let mut extra = vec![0u8; 8];
            extra[0] = IPPROTO_TCP;
            let quote = quoted_ipv6(ext, &extra);
            let loc = locate_transport(&PacketView::new(&quote)).unwrap();
            assert_eq!(loc.next_header, IPPROTO_TCP);
            assert_eq!(loc.offset, 48);
            assert_eq!(loc.skipped, Some(ext));
            assert_eq!(loc.payload_offset(), 68);
        }
    }

    #[test]
    fn test_icmpv6_payload_offset() {
        let quote = quoted_ipv6(IPPROTO_ICMPV6, &[]);
        let loc = locate_transport(&PacketView::new(&quote)).unwrap();
        assert_eq!(loc.payload_offset(), 48);
    }

    #[test]
    fn test_extension_chain_rejected() {
        let mut extra = vec![0u8; 16];
        extra[0] = NH_FRAGMENT;
        let quote = quoted_ipv6(NH_HOP_BY_HOP, &extra);
        assert_eq!(
            locate_transport(&PacketView::new(&quote)),
            Err(DissectError::UnknownQuoteProtocol(Some(NH_FRAGMENT)))
        );
    }

    #[test]
    fn test_routing_header_not_unwound() {
        let quote = quoted_ipv6(NH_ROUTING, &[0u8; 8]);
        assert_eq!(
            locate_transport(&PacketView::new(&quote)),
            Err(DissectError::UnknownQuoteProtocol(Some(NH_ROUTING)))
        );
    }

    #[test]
    fn test_unknown_transport() {
        let quote = quoted_ipv6(47, &[]);
        assert_eq!(
            locate_transport(&PacketView::new(&quote)),
            Err(DissectError::UnknownQuoteProtocol(Some(47)))
        );
    }

    #[test]
    fn test_truncated() {
        let quote = quoted_ipv6(NH_DEST_OPTS, &[]);
        assert!(matches!(
            locate_transport(&PacketView::new(&quote)),
            Err(DissectError::TruncatedPacket { offset: 40, .. })
        ));
        assert!(locate_transport(&PacketView::new(&[0x60; 39])).is_err());
    }
}
