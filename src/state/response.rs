use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use crate::error::DissectError;

/// One MPLS label stack entry (RFC 3032)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MplsLabel {
    /// 20-bit label value
    pub label: u32,
    /// 3-bit traffic class (formerly EXP)
    pub exp: u8,
    /// Bottom-of-stack flag
    pub bottom: bool,
    pub ttl: u8,
}

impl MplsLabel {
    /// Decode a big-endian label stack entry
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let word = u32::from_be_bytes(*bytes);
        Self {
            label: word >> 12,
            exp: ((word >> 9) & 0x07) as u8,
            bottom: (word >> 8) & 0x01 == 1,
            ttl: (word & 0xFF) as u8,
        }
    }
}

/// Data the prober embeds after the transport header of every IPv6 probe.
///
/// Wire layout (32 bytes, network order):
/// - `[0..4]`   signature
/// - `[4..20]`  intended target
/// - `[20]`     instance
/// - `[21]`     sent hop limit
/// - `[22..24]` checksum fudge (ignored)
/// - `[24..28]` elapsed-at-send timestamp
/// - `[28..32]` fingerprint (node list index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanPayload {
    pub signature: u32,
    pub target: Ipv6Addr,
    pub instance: u8,
    pub ttl: u8,
    pub diff: u32,
    pub fingerprint: u32,
}

impl ScanPayload {
    pub const LEN: usize = 32;

    /// Serialize in the layout the prober sends
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..4].copy_from_slice(&self.signature.to_be_bytes());
        buf[4..20].copy_from_slice(&self.target.octets());
        buf[20] = self.instance;
        buf[21] = self.ttl;
        buf[24..28].copy_from_slice(&self.diff.to_be_bytes());
        buf[28..32].copy_from_slice(&self.fingerprint.to_be_bytes());
        buf
    }
}

/// Result category derived from ICMP type and code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResponseKind {
    TimeExceeded,
    DestinationUnreachable,
    EchoReply,
    Other,
}

impl ResponseKind {
    /// ICMPv4: only time-exceeded-in-transit and unreachable quote our probes
    pub fn from_v4(icmp_type: u8, code: u8) -> Self {
        match (icmp_type, code) {
            (11, 0) => Self::TimeExceeded,
            (3, _) => Self::DestinationUnreachable,
            _ => Self::Other,
        }
    }

    pub fn from_v6(icmp_type: u8) -> Self {
        match icmp_type {
            3 => Self::TimeExceeded,
            1 => Self::DestinationUnreachable,
            129 => Self::EchoReply,
            _ => Self::Other,
        }
    }

    /// Whether the reply quotes the invoking packet
    pub fn carries_quote(self) -> bool {
        matches!(self, Self::TimeExceeded | Self::DestinationUnreachable)
    }
}

/// Whether a reply came from the probe's target or from a router on the way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Hit {
    Target,
    Hop,
}

/// Fields shared by IPv4 and IPv6 responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeEcho {
    pub icmp_type: u8,
    pub code: u8,
    /// TTL / hop limit the probe was sent with
    pub probe_ttl: u8,
    pub instance: u8,
    /// None when the recovered send time lies in the future
    pub rtt_micros: Option<u32>,
    /// Ports of the original probe (zero when unknown or invalidated)
    pub source_port: u16,
    pub dest_port: u16,
    pub quoted_protocol: Option<u8>,
    /// Quoted IPv4 total length or quoted IPv6 payload length
    pub probe_size: u16,
    /// Outer IPv4 total length or outer IPv6 payload length
    pub reply_size: u16,
    pub reply_ttl: u8,
    pub received_at: DateTime<Utc>,
    /// Why the quote was only partially decoded, if it was
    pub issue: Option<DissectError>,
}

impl ProbeEcho {
    pub fn new(
        icmp_type: u8,
        code: u8,
        reply_size: u16,
        reply_ttl: u8,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            icmp_type,
            code,
            probe_ttl: 0,
            instance: 0,
            rtt_micros: None,
            source_port: 0,
            dest_port: 0,
            quoted_protocol: None,
            probe_size: 0,
            reply_size,
            reply_ttl,
            received_at,
            issue: None,
        }
    }

    pub fn has_ports(&self) -> bool {
        self.source_port != 0 || self.dest_port != 0
    }

    /// Forget recovered ports, used when the quoted destination is corrupt
    pub fn clear_ports(&mut self) {
        self.source_port = 0;
        self.dest_port = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Icmp4Response {
    #[serde(flatten)]
    pub echo: ProbeEcho,
    pub source: Ipv4Addr,
    pub reply_tos: u8,
    pub reply_ip_id: u16,
    pub quoted_dest: Option<Ipv4Addr>,
    /// Internet checksum of the quoted destination address
    pub quoted_dest_checksum: Option<u16>,
    pub mpls: Option<Vec<MplsLabel>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Icmp6Response {
    #[serde(flatten)]
    pub echo: ProbeEcho,
    pub source: Ipv6Addr,
    pub quoted_dest: Option<Ipv6Addr>,
    pub payload: Option<ScanPayload>,
    /// Payload signature matched this scanner
    pub is_scan: bool,
}

/// A classified reply. Lives only as long as the packet that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum IcmpResponse {
    V4(Icmp4Response),
    V6(Icmp6Response),
}

impl IcmpResponse {
    pub fn echo(&self) -> &ProbeEcho {
        match self {
            Self::V4(r) => &r.echo,
            Self::V6(r) => &r.echo,
        }
    }

    pub fn source(&self) -> IpAddr {
        match self {
            Self::V4(r) => IpAddr::V4(r.source),
            Self::V6(r) => IpAddr::V6(r.source),
        }
    }

    pub fn kind(&self) -> ResponseKind {
        match self {
            Self::V4(r) => ResponseKind::from_v4(r.echo.icmp_type, r.echo.code),
            Self::V6(r) => ResponseKind::from_v6(r.echo.icmp_type),
        }
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.echo()
            .rtt_micros
            .map(|us| Duration::from_micros(us as u64))
    }

    pub fn quoted_destination(&self) -> Option<IpAddr> {
        match self {
            Self::V4(r) => r.quoted_dest.map(IpAddr::V4),
            Self::V6(r) => r.quoted_dest.map(IpAddr::V6),
        }
    }

    /// Destination of the invoking probe, reported only for
    /// time-exceeded-in-transit replies
    pub fn probe_destination(&self) -> Option<IpAddr> {
        let echo = self.echo();
        if self.kind() == ResponseKind::TimeExceeded && echo.code == 0 {
            self.quoted_destination()
        } else {
            None
        }
    }

    /// The address the probe was aimed at: the quoted destination, or for
    /// IPv6 echo replies (which quote nothing) the payload's target
    pub fn target(&self) -> Option<IpAddr> {
        match self {
            Self::V4(r) => r.quoted_dest.map(IpAddr::V4),
            Self::V6(r) if self.kind() == ResponseKind::EchoReply => {
                r.payload.map(|p| IpAddr::V6(p.target))
            }
            Self::V6(r) => r.quoted_dest.map(IpAddr::V6),
        }
    }

    pub fn hit(&self) -> Option<Hit> {
        self.target().map(|target| {
            if target == self.source() {
                Hit::Target
            } else {
                Hit::Hop
            }
        })
    }

    pub fn is_scan(&self) -> bool {
        matches!(self, Self::V6(r) if r.is_scan)
    }

    pub fn mpls_stack(&self) -> Option<&[MplsLabel]> {
        match self {
            Self::V4(r) => r.mpls.as_deref(),
            Self::V6(_) => None,
        }
    }

    /// Classification label used in probe-type output, e.g.
    /// `ICMP6_EchoReply_withPayload_Target` or `ICMP_TimeExceeded_Hop`
    pub fn label(&self) -> String {
        let hit = self.hit();
        match self {
            Self::V4(r) => {
                let mut label = match self.kind() {
                    ResponseKind::TimeExceeded => "ICMP_TimeExceeded".to_string(),
                    ResponseKind::DestinationUnreachable => "ICMP_Unreach".to_string(),
                    _ => format!("ICMP_Type{}", r.echo.icmp_type),
                };
                match hit {
                    Some(Hit::Target) => label.push_str("_Target"),
                    Some(Hit::Hop) => label.push_str("_Hop"),
                    None => {}
                }
                label
            }
            Self::V6(r) => {
                let mut label = match self.kind() {
                    ResponseKind::TimeExceeded => "ICMP6_TimeExceeded_".to_string(),
                    ResponseKind::DestinationUnreachable => "ICMP6_DstUnreach_".to_string(),
                    ResponseKind::EchoReply => "ICMP6_EchoReply_".to_string(),
                    ResponseKind::Other => format!("ICMP6_Type{}_", r.echo.icmp_type),
                };
                if r.is_scan {
                    label.push_str("withPayload_");
                    if hit == Some(Hit::Target) {
                        label.push_str("Target");
                    } else {
                        label.push_str("Src");
                    }
                } else {
                    label.push_str("noPayload");
                }
                label
            }
        }
    }
}
