//! Turning one received ICMP/ICMPv6 packet into a classified response.
//!
//! Everything the prober needs to match a reply to its probe travels inside
//! the reply itself: the quoted headers carry ports and an encoded send time,
//! and IPv6 probes carry a scan payload. Classification is a pure function of
//! the packet bytes and the caller's clock.

use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::{debug, trace};

use crate::error::{DissectError, Result};
use crate::probe::checksum::{ipv4_destination_checksum, ipv6_destination_checksum, verify_port};
use crate::probe::ipv6_ext::locate_transport;
use crate::probe::mpls::parse_mpls_extension;
use crate::probe::payload::{SCAN_SIGNATURE, decode_payload};
use crate::probe::timestamp::{
    IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP, payload_rtt, recover,
};
use crate::probe::view::{ICMP_HEADER_LEN, PacketView};
use crate::state::{Icmp4Response, Icmp6Response, IcmpResponse, ProbeEcho, ResponseKind};

/// Receive-side clock supplied with each packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    /// Microseconds since scan start, truncated to 32 bits like the prober's
    pub elapsed: u32,
    pub received_at: DateTime<Utc>,
}

impl Clock {
    pub fn new(elapsed: u32, received_at: DateTime<Utc>) -> Self {
        Self {
            elapsed,
            received_at,
        }
    }

    /// Clock reading for a packet received now, in a scan started at `start`
    pub fn since(start: Instant) -> Self {
        Self::new(start.elapsed().as_micros() as u32, Utc::now())
    }
}

/// Stateless response classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    signature: u32,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(SCAN_SIGNATURE)
    }
}

impl Classifier {
    /// Classifier that recognizes scan payloads stamped with `signature`
    pub fn new(signature: u32) -> Self {
        Self { signature }
    }

    pub fn signature(&self) -> u32 {
        self.signature
    }

    /// Classify a received IP packet (starting at the IP header).
    ///
    /// Fails only when the outer IP or ICMP header is unusable; problems in
    /// the quoted probe are recorded on the response as its `issue`.
    pub fn classify(&self, packet: &[u8], clock: &Clock) -> Result<IcmpResponse> {
        let view = PacketView::new(packet);
        match view.ip_version()? {
            4 => self.classify_v4(view, clock),
            6 => self.classify_v6(view, clock),
            version => Err(DissectError::UnsupportedVersion(version)),
        }
    }

    fn classify_v4(&self, view: PacketView<'_>, clock: &Clock) -> Result<IcmpResponse> {
        let ip = view.ipv4()?;
        if ip.protocol() != IPPROTO_ICMP {
            return Err(DissectError::NotIcmp(ip.protocol()));
        }
        let icmp = ip.payload()?;
        let header = icmp.icmp()?;

        let mut response = Icmp4Response {
            echo: ProbeEcho::new(
                header.icmp_type,
                header.code,
                ip.total_length(),
                ip.ttl(),
                clock.received_at,
            ),
            source: ip.source(),
            reply_tos: ip.tos(),
            reply_ip_id: ip.identification(),
            quoted_dest: None,
            quoted_dest_checksum: None,
            mpls: None,
        };

        if ResponseKind::from_v4(header.icmp_type, header.code).carries_quote() {
            let quote = icmp.tail(ICMP_HEADER_LEN)?;
            if let Err(issue) = dissect_v4_quote(&quote, clock.elapsed, &mut response) {
                response.echo.issue = Some(degrade(issue, response.echo.quoted_protocol));
            }
            response.mpls = parse_mpls_extension(&icmp, &header, response.echo.reply_size);
        }

        trace!(
            source = %response.source,
            icmp_type = header.icmp_type,
            code = header.code,
            "classified IPv4 response"
        );
        Ok(IcmpResponse::V4(response))
    }

    fn classify_v6(&self, view: PacketView<'_>, clock: &Clock) -> Result<IcmpResponse> {
        let ip = view.ipv6()?;
        if ip.next_header() != IPPROTO_ICMPV6 {
            return Err(DissectError::NotIcmp(ip.next_header()));
        }
        let icmp = ip.payload()?;
        let header = icmp.icmp()?;
        let body = icmp.tail(ICMP_HEADER_LEN)?;

        let mut response = Icmp6Response {
            echo: ProbeEcho::new(
                header.icmp_type,
                header.code,
                ip.payload_length(),
                ip.hop_limit(),
                clock.received_at,
            ),
            source: ip.source(),
            quoted_dest: None,
            payload: None,
            is_scan: false,
        };

        let kind = ResponseKind::from_v6(header.icmp_type);
        // Echo replies return our payload directly instead of quoting the probe
        let payload = if kind == ResponseKind::EchoReply {
            Some(body)
        } else {
            match dissect_v6_quote(&body, kind, &mut response) {
                Ok(payload) => payload,
                Err(issue) => {
                    response.echo.issue = Some(degrade(issue, response.echo.quoted_protocol));
                    None
                }
            }
        };

        match payload.map(|view| decode_payload(&view)) {
            Some(Ok(scan)) => {
                response.is_scan = scan.signature == self.signature;
                response.echo.probe_ttl = scan.ttl;
                response.echo.instance = scan.instance;
                response.echo.rtt_micros = payload_rtt(scan.diff, clock.elapsed);
                response.payload = Some(scan);
            }
            Some(Err(error)) => trace!(%error, source = %response.source, "no scan payload"),
            None => {}
        }

        trace!(
            source = %response.source,
            icmp_type = header.icmp_type,
            is_scan = response.is_scan,
            "classified IPv6 response"
        );
        Ok(IcmpResponse::V6(response))
    }
}

/// A quote that ends early is as useless as one of the wrong protocol
fn degrade(issue: DissectError, quoted_protocol: Option<u8>) -> DissectError {
    debug!(%issue, "partial quote");
    match issue {
        DissectError::TruncatedPacket { .. } => DissectError::UnknownQuoteProtocol(quoted_protocol),
        other => other,
    }
}

/// Recover probe TTL, instance, timing and ports from a quoted IPv4 probe
fn dissect_v4_quote(quote: &PacketView<'_>, elapsed: u32, response: &mut Icmp4Response) -> Result<()> {
    let ip = quote.ipv4()?;
    let echo = &mut response.echo;
    echo.quoted_protocol = Some(ip.protocol());
    echo.probe_size = ip.total_length();
    // The prober packs TTL and instance into the IP identification field
    echo.probe_ttl = (ip.identification() & 0xFF) as u8;
    echo.instance = (ip.identification() >> 8) as u8;

    let dest = ip.destination();
    let dest_checksum = ipv4_destination_checksum(dest);
    response.quoted_dest = Some(dest);
    response.quoted_dest_checksum = Some(dest_checksum);

    let timing = recover(ip.protocol(), &ip.payload()?, elapsed)?;
    echo.rtt_micros = timing.rtt_micros;
    echo.source_port = timing.source_port;
    echo.dest_port = timing.dest_port;

    // ICMP probes carry the destination checksum where a port would be
    if timing.protocol == IPPROTO_ICMP
        && let Err(mismatch) = verify_port(dest_checksum, timing.source_port)
    {
        echo.clear_ports();
        return Err(mismatch);
    }
    Ok(())
}

/// Walk a quoted IPv6 probe: record its destination and ports, and return
/// the view where its scan payload should start (if the quote reaches it)
fn dissect_v6_quote<'a>(
    quote: &PacketView<'a>,
    kind: ResponseKind,
    response: &mut Icmp6Response,
) -> Result<Option<PacketView<'a>>> {
    let ip = quote.ipv6()?;
    let dest = ip.destination();
    response.quoted_dest = Some(dest);
    response.echo.quoted_protocol = Some(ip.next_header());

    let location = locate_transport(quote)?;
    response.echo.quoted_protocol = Some(location.next_header);

    if kind.carries_quote() {
        let echo = &mut response.echo;
        echo.probe_size = ip.payload_length();
        let (source_port, dest_port) = quoted_ports(location.next_header, &quote.tail(location.offset)?)?;
        echo.source_port = source_port;
        echo.dest_port = dest_port;
        if let Err(mismatch) = verify_port(ipv6_destination_checksum(dest), source_port) {
            debug!(%mismatch, quoted = %dest, "quoted IPv6 destination is corrupt");
            echo.clear_ports();
            echo.issue = Some(mismatch);
        }
    }

    Ok(quote.tail(location.payload_offset()).ok())
}

/// Ports of a quoted IPv6 probe. ICMPv6 probes use identifier and sequence.
fn quoted_ports(protocol: u8, transport: &PacketView<'_>) -> Result<(u16, u16)> {
    match protocol {
        IPPROTO_TCP => transport.tcp().map(|tcp| (tcp.source_port, tcp.dest_port)),
        IPPROTO_UDP => transport.udp().map(|udp| (udp.source_port, udp.dest_port)),
        IPPROTO_ICMPV6 => transport.icmp().map(|icmp| (icmp.identifier(), icmp.sequence())),
        other => Err(DissectError::UnknownQuoteProtocol(Some(other))),
    }
}
