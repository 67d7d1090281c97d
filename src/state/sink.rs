//! Aggregation of classified responses across a scan.
//!
//! The classifier never touches shared state. Everything that outlives a
//! packet (address set, region node counters, prefix counts) lives here and
//! is passed in explicitly.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{DissectError, Result};
use crate::state::response::{Hit, IcmpResponse, ResponseKind};

/// Low nibbles the scanner uses for pseudorandom probe addresses. Responders
/// ending in this suffix were generated, not discovered.
pub const PSEUDORANDOM_SUFFIX: &str = "1234";

/// How target hits feed back into address-space search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Region tree, counting every scanned target that answers
    #[default]
    RegionTreeScan,
    /// Region tree, counting only hit-list targets
    RegionTreeHit,
    /// Fixed-length prefix counting with discovered-address output
    HeuristicPrefix,
}

impl Strategy {
    pub fn uses_region_tree(self) -> bool {
        matches!(self, Self::RegionTreeScan | Self::RegionTreeHit)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RegionTreeScan => "region-tree-scan",
            Self::RegionTreeHit => "region-tree-hit",
            Self::HeuristicPrefix => "heuristic-prefix",
        };
        f.write_str(name)
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "region-tree-scan" | "scan" | "scan6" => Ok(Self::RegionTreeScan),
            "region-tree-hit" | "hit" | "hit6" => Ok(Self::RegionTreeHit),
            "heuristic-prefix" | "heuristic" => Ok(Self::HeuristicPrefix),
            other => Err(format!(
                "unknown strategy '{other}' (expected region-tree-scan, region-tree-hit or heuristic-prefix)"
            )),
        }
    }
}

/// One region of the externally built address tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegionNode {
    /// Target hits attributed to this region
    pub active: u64,
}

/// What happened to one response once it reached the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub kind: ResponseKind,
    pub hit: Option<Hit>,
    /// A result line should be written for this response
    pub emit: bool,
    /// Heuristic strategy added the responder to the discovered list
    pub discovered: bool,
    pub issue: Option<DissectError>,
}

/// The operations classification results drive. Implemented by
/// [`ScanStats`]; tests substitute their own recorders.
pub trait Aggregator {
    fn strategy(&self) -> Strategy;
    /// Prefix length in bits used by the heuristic strategy
    fn prefix_mask(&self) -> u8;
    /// Returns false if the address was already known
    fn insert_address(&mut self, addr: IpAddr) -> bool;
    /// Bump the hit counter of the region a fingerprint points at
    fn increment_active(&mut self, fingerprint: u32) -> Result<u64>;
    /// Bump an existing prefix counter. Unknown prefixes are ignored.
    fn increment_prefix_count(&mut self, prefix: &str) -> bool;
    fn push_discovered(&mut self, addr: String);
    fn record_bad_destination(&mut self);
    fn tally(&mut self, outcome: &Outcome);
}

/// Running counters for the end-of-run summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub read: u64,
    pub malformed_lines: u64,
    pub dropped: u64,
    pub classified: u64,
    pub time_exceeded: u64,
    pub unreachable: u64,
    pub echo_replies: u64,
    pub other: u64,
    pub target_hits: u64,
    pub hop_hits: u64,
    pub emitted: u64,
    pub degraded: u64,
    pub checksum_mismatches: u64,
}

/// Scan-wide aggregation state
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    pub strategy: Strategy,
    pub prefix_mask: u8,
    pub addresses: HashSet<IpAddr>,
    pub nodes: Vec<RegionNode>,
    pub prefix_counts: HashMap<String, u64>,
    pub discovered: Vec<String>,
    pub bad_destinations: u64,
    pub tally: Tally,
}

impl ScanStats {
    pub fn new(strategy: Strategy, prefix_mask: u8, node_count: usize) -> Self {
        Self {
            strategy,
            prefix_mask,
            nodes: vec![RegionNode::default(); node_count],
            ..Default::default()
        }
    }

    /// Register a prefix the heuristic strategy should count hits for
    pub fn seed_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix_counts.entry(prefix.into()).or_insert(0);
    }

    pub fn record_read(&mut self) {
        self.tally.read += 1;
    }

    pub fn record_malformed(&mut self) {
        self.tally.malformed_lines += 1;
    }

    pub fn record_dropped(&mut self, error: &DissectError) {
        debug!(%error, "dropping packet");
        self.tally.dropped += 1;
    }
}

impl Aggregator for ScanStats {
    fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn prefix_mask(&self) -> u8 {
        self.prefix_mask
    }

    fn insert_address(&mut self, addr: IpAddr) -> bool {
        self.addresses.insert(addr)
    }

    fn increment_active(&mut self, fingerprint: u32) -> Result<u64> {
        let len = self.nodes.len();
        let node = self
            .nodes
            .get_mut(fingerprint as usize)
            .ok_or(DissectError::FingerprintOutOfRange {
                index: fingerprint,
                len,
            })?;
        node.active += 1;
        Ok(node.active)
    }

    fn increment_prefix_count(&mut self, prefix: &str) -> bool {
        match self.prefix_counts.get_mut(prefix) {
            Some(count) => {
                *count += 1;
                true
            }
            None => false,
        }
    }

    fn push_discovered(&mut self, addr: String) {
        self.discovered.push(addr);
    }

    fn record_bad_destination(&mut self) {
        self.bad_destinations += 1;
    }

    fn tally(&mut self, outcome: &Outcome) {
        let tally = &mut self.tally;
        tally.classified += 1;
        match outcome.kind {
            ResponseKind::TimeExceeded => tally.time_exceeded += 1,
            ResponseKind::DestinationUnreachable => tally.unreachable += 1,
            ResponseKind::EchoReply => tally.echo_replies += 1,
            ResponseKind::Other => tally.other += 1,
        }
        match outcome.hit {
            Some(Hit::Target) => tally.target_hits += 1,
            Some(Hit::Hop) => tally.hop_hits += 1,
            None => {}
        }
        if outcome.emit {
            tally.emitted += 1;
        }
        match outcome.issue {
            Some(DissectError::ChecksumMismatch { .. }) => tally.checksum_mismatches += 1,
            Some(_) => tally.degraded += 1,
            None => {}
        }
    }
}

/// [`ScanStats`] shared between receive workers
#[derive(Debug, Clone, Default)]
pub struct SharedStats(Arc<RwLock<ScanStats>>);

impl SharedStats {
    pub fn new(stats: ScanStats) -> Self {
        Self(Arc::new(RwLock::new(stats)))
    }

    /// Feed one response through the sink under a single lock
    pub fn absorb(&self, response: &IcmpResponse) -> Outcome {
        absorb(response, &mut *self.0.write())
    }

    /// Run `f` with exclusive access, for counters outside [`Aggregator`]
    pub fn update<T>(&self, f: impl FnOnce(&mut ScanStats) -> T) -> T {
        f(&mut self.0.write())
    }

    pub fn snapshot(&self) -> ScanStats {
        self.0.read().clone()
    }
}

/// Expand an IPv6 address to its 32 lowercase hex nibbles
pub fn expand_nibbles(addr: Ipv6Addr) -> String {
    format!("{:032x}", u128::from(addr))
}

/// Apply one classified response to the aggregation state.
///
/// IPv4 responses are emitted only when ports were recovered, and a target
/// hit adds the responder to the address set. IPv6 responses are always
/// emitted; a scan-payload target hit additionally feeds the configured
/// strategy.
pub fn absorb(response: &IcmpResponse, sink: &mut impl Aggregator) -> Outcome {
    let hit = response.hit();
    let mut outcome = Outcome {
        kind: response.kind(),
        hit,
        emit: true,
        discovered: false,
        issue: response.echo().issue.clone(),
    };

    match response {
        IcmpResponse::V4(r) => {
            outcome.emit = r.echo.has_ports();
            if outcome.emit && hit == Some(Hit::Target) {
                sink.insert_address(IpAddr::V4(r.source));
            }
        }
        IcmpResponse::V6(r) => {
            if r.is_scan && hit == Some(Hit::Target) {
                sink.insert_address(IpAddr::V6(r.source));
                let strategy = sink.strategy();
                if strategy.uses_region_tree() {
                    if let Some(payload) = r.payload
                        && let Err(error) = sink.increment_active(payload.fingerprint)
                    {
                        warn!(%error, source = %r.source, "bad regional identification");
                        sink.record_bad_destination();
                    }
                } else {
                    let nibbles = expand_nibbles(r.source);
                    let prefix_len = (sink.prefix_mask() as usize / 4).min(nibbles.len());
                    sink.increment_prefix_count(&nibbles[..prefix_len]);
                    if !nibbles.ends_with(PSEUDORANDOM_SUFFIX) {
                        sink.push_discovered(nibbles);
                        outcome.discovered = true;
                    }
                }
            }
        }
    }

    sink.tally(&outcome);
    outcome
}
