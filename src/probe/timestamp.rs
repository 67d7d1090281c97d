//! Send-time recovery from quoted probe headers.
//!
//! The prober keeps no per-probe state. Instead it smuggles the elapsed-time
//! clock (microseconds since scan start, 32 bits) into header fields that a
//! router will quote back:
//!
//! - TCP: the sequence number is the timestamp.
//! - UDP: the checksum field holds the low 16 bits, the payload length
//!   beyond 2 bytes holds the high bits.
//! - ICMP: identifier is the low half, sequence the high half. The ICMP
//!   checksum is fixed to the destination checksum and doubles as a port.

use crate::error::{DissectError, Result};
use crate::probe::view::PacketView;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;

/// Bytes of the UDP length field that never carry timestamp bits
/// (UDP header plus the fixed probe preamble).
pub const UDP_LENGTH_BIAS: i32 = 28;

/// Checksum value sent on the wire when the computed checksum is zero (RFC 768)
const UDP_ZERO_CHECKSUM: u16 = 0xFFFF;

/// What a quoted transport header tells us about the original probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteTiming {
    pub protocol: u8,
    /// Decoded send timestamp, before any all-ones checksum correction
    pub timestamp: u32,
    /// None when the timestamp lies in the future
    pub rtt_micros: Option<u32>,
    pub source_port: u16,
    pub dest_port: u16,
}

/// RTT from a TCP sequence number. Wraps mod 2^32 rather than failing.
pub fn tcp_rtt(sequence: u32, elapsed: u32) -> u32 {
    elapsed.wrapping_sub(sequence)
}

/// Timestamp carried by a UDP probe's checksum and payload length
pub fn udp_timestamp(checksum: u16, payload_len: i32) -> u32 {
    let mut timestamp = checksum as u32;
    if payload_len > 2 {
        timestamp = timestamp.wrapping_add(((payload_len - 2) as u32) << 16);
    }
    timestamp
}

/// RTT from a UDP probe. If the decoded timestamp is in the future and the
/// checksum is all-ones, the sender actually computed zero and the stack
/// substituted 0xFFFF; redo the decode with a zero low half.
pub fn udp_rtt(checksum: u16, payload_len: i32, elapsed: u32) -> Option<u32> {
    let timestamp = udp_timestamp(checksum, payload_len);
    if elapsed >= timestamp {
        return Some(elapsed - timestamp);
    }
    if checksum == UDP_ZERO_CHECKSUM {
        let corrected = udp_timestamp(0, payload_len);
        return elapsed.checked_sub(corrected);
    }
    None
}

/// Timestamp carried by an ICMP echo probe's identifier and sequence
pub fn icmp_timestamp(identifier: u16, sequence: u16) -> u32 {
    (identifier as u32) | ((sequence as u32) << 16)
}

/// RTT from a scan payload's send-time field
pub fn payload_rtt(diff: u32, elapsed: u32) -> Option<u32> {
    elapsed.checked_sub(diff)
}

/// Recover timing and ports from the transport header that follows a quoted
/// IPv4 header. Fails with `UnknownQuoteProtocol` for anything but
/// TCP/UDP/ICMP, or `TruncatedPacket` when the quote is too short.
pub fn recover(protocol: u8, transport: &PacketView<'_>, elapsed: u32) -> Result<QuoteTiming> {
    match protocol {
        IPPROTO_TCP => {
            let tcp = transport.tcp()?;
            Ok(QuoteTiming {
                protocol,
                timestamp: tcp.sequence,
                rtt_micros: Some(tcp_rtt(tcp.sequence, elapsed)),
                source_port: tcp.source_port,
                dest_port: tcp.dest_port,
            })
        }
        IPPROTO_UDP => {
            let udp = transport.udp()?;
            let payload_len = udp.length as i32 - UDP_LENGTH_BIAS;
            Ok(QuoteTiming {
                protocol,
                timestamp: udp_timestamp(udp.checksum, payload_len),
                rtt_micros: udp_rtt(udp.checksum, payload_len, elapsed),
                source_port: udp.source_port,
                dest_port: udp.dest_port,
            })
        }
        IPPROTO_ICMP => {
            let icmp = transport.icmp()?;
            let timestamp = icmp_timestamp(icmp.identifier(), icmp.sequence());
            Ok(QuoteTiming {
                protocol,
                timestamp,
                rtt_micros: Some(elapsed.wrapping_sub(timestamp)),
                source_port: icmp.checksum,
                dest_port: 0,
            })
        }
        other => Err(DissectError::UnknownQuoteProtocol(Some(other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn udp_quote(checksum: u16, payload_len: u16) -> Vec<u8> {
        let mut udp = vec![0u8; 8];
        udp[0..2].copy_from_slice(&0x4d2au16.to_be_bytes());
        udp[2..4].copy_from_slice(&33434u16.to_be_bytes());
        udp[4..6].copy_from_slice(&(payload_len + UDP_LENGTH_BIAS as u16).to_be_bytes());
        udp[6..8].copy_from_slice(&checksum.to_be_bytes());
        udp
    }

    #[test]
    fn test_tcp_recover() {
        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&443u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&80u16.to_be_bytes());
        tcp[4..8].copy_from_slice(&1_000_000u32.to_be_bytes());

        let timing = recover(IPPROTO_TCP, &PacketView::new(&tcp), 1_004_500).unwrap();
        assert_eq!(timing.timestamp, 1_000_000);
        assert_eq!(timing.rtt_micros, Some(4_500));
        assert_eq!(timing.source_port, 443);
        assert_eq!(timing.dest_port, 80);
    }

    #[test]
    fn test_tcp_rtt_wraps() {
        assert_eq!(tcp_rtt(10, 5), u32::MAX - 4);
    }

    #[test]
    fn test_udp_timestamp_high_bits() {
        assert_eq!(udp_timestamp(0x1234, 2), 0x1234);
        assert_eq!(udp_timestamp(0x1234, 5), 0x0003_1234);
        assert_eq!(udp_timestamp(0x1234, -10), 0x1234);
    }

    #[test]
    fn test_udp_recover_direct() {
        let quote = udp_quote(0x0100, 4);
        let elapsed = 0x0002_0100 + 750;
        let timing = recover(IPPROTO_UDP, &PacketView::new(&quote), elapsed).unwrap();
        assert_eq!(timing.timestamp, 0x0002_0100);
        assert_eq!(timing.rtt_micros, Some(750));
        assert_eq!(timing.source_port, 0x4d2a);
        assert_eq!(timing.dest_port, 33434);
    }

    #[test]
    fn test_udp_all_ones_checksum_corrected() {
        // Sender computed a zero checksum, stack transmitted 0xFFFF
        let elapsed = (3u32 << 16) + 20;
        assert_eq!(udp_timestamp(0xFFFF, 5), (3 << 16) | 0xFFFF);
        assert_eq!(udp_rtt(0xFFFF, 5, elapsed), Some(20));
    }

    #[test]
    fn test_udp_future_timestamp_unknown() {
        // Not all-ones: leave RTT unknown
        assert_eq!(udp_rtt(0x8000, 3, 10), None);
        // All-ones but even the corrected stamp is in the future
        assert_eq!(udp_rtt(0xFFFF, 10, 5), None);
    }

    #[test]
    fn test_icmp_recover() {
        let mut icmp = vec![0u8; 8];
        icmp[0] = 8;
        icmp[2..4].copy_from_slice(&0xBEEFu16.to_be_bytes());
        icmp[4..6].copy_from_slice(&0x5678u16.to_be_bytes()); // identifier = low half
        icmp[6..8].copy_from_slice(&0x0001u16.to_be_bytes()); // sequence = high half

        let timing = recover(IPPROTO_ICMP, &PacketView::new(&icmp), 0x0001_5678 + 99).unwrap();
        assert_eq!(timing.timestamp, 0x0001_5678);
        assert_eq!(timing.rtt_micros, Some(99));
        assert_eq!(timing.source_port, 0xBEEF);
        assert_eq!(timing.dest_port, 0);
    }

    #[test]
    fn test_unknown_protocol() {
        let data = [0u8; 8];
        assert_eq!(
            recover(47, &PacketView::new(&data), 0),
            Err(DissectError::UnknownQuoteProtocol(Some(47)))
        );
    }

    #[test]
    fn test_truncated_quote() {
        let data = [0u8; 6];
        assert!(matches!(
            recover(IPPROTO_TCP, &PacketView::new(&data), 0),
            Err(DissectError::TruncatedPacket { .. })
        ));
    }

    #[test]
    fn test_payload_rtt() {
        assert_eq!(payload_rtt(100, 250), Some(150));
        assert_eq!(payload_rtt(250, 100), None);
    }

    proptest! {
        #[test]
        fn proptest_tcp_rtt_exact(seq in any::<u32>(), delta in any::<u32>()) {
            let elapsed = seq.wrapping_add(delta);
            prop_assert_eq!(tcp_rtt(seq, elapsed), delta);
        }

        #[test]
        fn proptest_udp_timestamp_formula(checksum in any::<u16>(), len in 3u16..2000) {
            let expected = checksum as u32 + (((len - 2) as u32) << 16);
            let quote = udp_quote(checksum, len);
            let timing = recover(IPPROTO_UDP, &PacketView::new(&quote), u32::MAX).unwrap();
            prop_assert_eq!(timing.timestamp, expected);
        }

        #[test]
        fn proptest_udp_rtt_never_future(checksum in any::<u16>(), len in 0i32..2000, elapsed in any::<u32>()) {
            if let Some(rtt) = udp_rtt(checksum, len, elapsed) {
                prop_assert!(rtt <= elapsed);
            }
        }
    }
}
