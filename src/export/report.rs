use std::io::Write;

use crate::export::lines::NO_QUOTE;
use crate::probe::timestamp::{IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP};
use crate::state::{IcmpResponse, MplsLabel, ScanStats};

/// Render a label stack as `label:ttl` pairs, or `0` when there is none
pub fn mpls_string(labels: Option<&[MplsLabel]>) -> String {
    match labels {
        Some(labels) if !labels.is_empty() => labels
            .iter()
            .map(|l| format!("{}:{}", l.label, l.ttl))
            .collect::<Vec<_>>()
            .join(","),
        _ => "0".to_string(),
    }
}

fn rtt_ms(response: &IcmpResponse) -> String {
    match response.echo().rtt_micros {
        Some(us) => format!("{:.3}ms", us as f64 / 1000.0),
        None => "?".to_string(),
    }
}

/// One-line summary of a response
pub fn terse(response: &IcmpResponse) -> String {
    let echo = response.echo();
    let mut line = format!(
        ">> ICMP response: {} Type: {} Code: {} TTL: {} RTT: {}",
        response.source(),
        echo.icmp_type,
        echo.code,
        echo.probe_ttl,
        rtt_ms(response)
    );
    if echo.instance != 0 {
        line.push_str(&format!(" Inst: {}", echo.instance));
    }
    line
}

/// Multi-line description of everything recovered from a response
pub fn describe(response: &IcmpResponse) -> String {
    let echo = response.echo();
    let family = match response {
        IcmpResponse::V4(_) => "ICMP",
        IcmpResponse::V6(_) => "ICMP6",
    };
    let probe_dst = response
        .quoted_destination()
        .map(|d| d.to_string())
        .unwrap_or_else(|| NO_QUOTE.to_string());

    let mut lines = vec![
        format!("{family} response:"),
        format!(
            "\ttype: {} code: {} from: {}",
            echo.icmp_type,
            echo.code,
            response.source()
        ),
        format!("\tinstance: {}", echo.instance),
        format!(
            "\treceived: {}",
            echo.received_at.format("%Y-%m-%d %H:%M:%S%.6f UTC")
        ),
        format!("\tRTT: {}", rtt_ms(response)),
        format!("\tprobe dst: {probe_dst}"),
        format!("\tprobe TTL: {}", echo.probe_ttl),
    ];
    if let IcmpResponse::V4(r) = response
        && r.reply_ip_id != 0
    {
        lines.push(format!("\treply IP-ID: {}", r.reply_ip_id));
    }
    if let Some(protocol) = echo.quoted_protocol {
        lines.push(format!("\tquoted protocol: {protocol}"));
        match protocol {
            IPPROTO_TCP | IPPROTO_UDP => lines.push(format!(
                "\tprobe src/dst port: {}/{}",
                echo.source_port, echo.dest_port
            )),
            IPPROTO_ICMP | IPPROTO_ICMPV6 => {
                lines.push(format!("\tquoted ICMP checksum: {}", echo.source_port))
            }
            _ => {}
        }
    }
    if let IcmpResponse::V4(r) = response
        && let Some(sum) = r.quoted_dest_checksum
    {
        lines.push(format!("\tprobe dst checksum: {sum}"));
    }
    if let Some(labels) = response.mpls_stack() {
        lines.push(format!("\tMPLS: [{}]", mpls_string(Some(labels))));
    }
    if let IcmpResponse::V6(r) = response {
        lines.push(format!(
            "\tscan payload: {}",
            if r.is_scan { "yes" } else { "no" }
        ));
    }
    if let Some(ref issue) = echo.issue {
        lines.push(format!("\tissue: {issue}"));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// End-of-run summary of a scan
pub fn generate_summary<W: Write>(stats: &ScanStats, mut writer: W) -> std::io::Result<()> {
    let t = &stats.tally;
    writeln!(writer, "scanreply summary ({})", stats.strategy)?;
    writeln!(writer, "{}", "-".repeat(40))?;
    writeln!(writer, "{:<24} {:>12}", "packets read", t.read)?;
    writeln!(writer, "{:<24} {:>12}", "malformed lines", t.malformed_lines)?;
    writeln!(writer, "{:<24} {:>12}", "dropped", t.dropped)?;
    writeln!(writer, "{:<24} {:>12}", "classified", t.classified)?;
    writeln!(writer, "{:<24} {:>12}", "  time exceeded", t.time_exceeded)?;
    writeln!(writer, "{:<24} {:>12}", "  unreachable", t.unreachable)?;
    writeln!(writer, "{:<24} {:>12}", "  echo replies", t.echo_replies)?;
    writeln!(writer, "{:<24} {:>12}", "  other", t.other)?;
    writeln!(writer, "{:<24} {:>12}", "target hits", t.target_hits)?;
    writeln!(writer, "{:<24} {:>12}", "hop replies", t.hop_hits)?;
    writeln!(writer, "{:<24} {:>12}", "lines emitted", t.emitted)?;
    writeln!(writer, "{:<24} {:>12}", "degraded quotes", t.degraded)?;
    writeln!(writer, "{:<24} {:>12}", "checksum mismatches", t.checksum_mismatches)?;
    writeln!(writer, "{:<24} {:>12}", "bad destinations", stats.bad_destinations)?;
    writeln!(writer, "{:<24} {:>12}", "unique addresses", stats.addresses.len())?;
    if stats.strategy.uses_region_tree() {
        let active = stats.nodes.iter().filter(|n| n.active > 0).count();
        writeln!(writer, "{:<24} {:>12}", "active regions", active)?;
    } else {
        writeln!(writer, "{:<24} {:>12}", "discovered", stats.discovered.len())?;
    }
    Ok(())
}

pub fn summary_string(stats: &ScanStats) -> std::io::Result<String> {
    let mut buf = Vec::new();
    generate_summary(stats, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DissectError;
    use crate::state::{Icmp4Response, ProbeEcho, Strategy, absorb};
    use chrono::DateTime;
    use std::net::Ipv4Addr;

    fn v4_response() -> IcmpResponse {
        let mut echo = ProbeEcho::new(11, 0, 120, 250, DateTime::from_timestamp(1, 500_000).unwrap());
        echo.probe_ttl = 7;
        echo.instance = 2;
        echo.rtt_micros = Some(12_345);
        echo.quoted_protocol = Some(IPPROTO_UDP);
        echo.source_port = 51_000;
        echo.dest_port = 33_435;
        IcmpResponse::V4(Icmp4Response {
            echo,
            source: Ipv4Addr::new(10, 1, 1, 1),
            reply_tos: 0,
            reply_ip_id: 4242,
            quoted_dest: Some(Ipv4Addr::new(192, 0, 2, 9)),
            quoted_dest_checksum: Some(0x3ff5),
            mpls: Some(vec![
                MplsLabel {
                    label: 16_005,
                    exp: 0,
                    bottom: false,
                    ttl: 1,
                },
                MplsLabel {
                    label: 24_001,
                    exp: 0,
                    bottom: true,
                    ttl: 1,
                },
            ]),
        })
    }

    #[test]
    fn test_mpls_string() {
        assert_eq!(mpls_string(None), "0");
        assert_eq!(mpls_string(Some(&[])), "0");
        assert_eq!(mpls_string(v4_response().mpls_stack()), "16005:1,24001:1");
    }

    #[test]
    fn test_terse() {
        assert_eq!(
            terse(&v4_response()),
            ">> ICMP response: 10.1.1.1 Type: 11 Code: 0 TTL: 7 RTT: 12.345ms Inst: 2"
        );
    }

    #[test]
    fn test_describe() {
        let text = describe(&v4_response());
        assert!(text.starts_with("ICMP response:\n"));
        assert!(text.contains("\ttype: 11 code: 0 from: 10.1.1.1\n"));
        assert!(text.contains("\treceived: 1970-01-01 00:00:01.000500 UTC\n"));
        assert!(text.contains("\tprobe dst: 192.0.2.9\n"));
        assert!(text.contains("\treply IP-ID: 4242\n"));
        assert!(text.contains("\tprobe src/dst port: 51000/33435\n"));
        assert!(text.contains("\tMPLS: [16005:1,24001:1]\n"));
        assert!(!text.contains("issue"));
    }

    #[test]
    fn test_describe_line_layout() {
        let text = describe(&v4_response());
        assert!(text.ends_with("]\n"));
        assert!(!text.ends_with("\n\n"));
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("ICMP response:"));
        assert!(lines.all(|l| l.starts_with('\t')));
    }

    #[test]
    fn test_describe_fresh_per_call() {
        let mut response = v4_response();
        let first = describe(&response);
        if let IcmpResponse::V4(r) = &mut response {
            r.echo.issue = Some(DissectError::UnknownQuoteProtocol(Some(47)));
        }
        let second = describe(&response);
        assert!(!first.contains("issue"));
        assert!(second.contains("\tissue: unusable quote (protocol 47)\n"));
    }

    #[test]
    fn test_summary() {
        let mut stats = ScanStats::new(Strategy::HeuristicPrefix, 64, 0);
        stats.record_read();
        absorb(&v4_response(), &mut stats);
        let text = summary_string(&stats).unwrap();
        assert!(text.starts_with("scanreply summary (heuristic-prefix)\n"));
        assert!(text.contains("classified"));
        assert!(text.contains("discovered"));
        assert!(!text.contains("active regions"));
    }
}
