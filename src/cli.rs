use clap::Parser;
use std::path::PathBuf;

use crate::state::Strategy;

/// Classify ICMP/ICMPv6 replies from a stateless scan and report hits
#[derive(Parser, Debug, Clone)]
#[command(name = "scanreply")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Capture file of "<elapsed_micros> <hex packet>" lines (stdin if omitted or "-")
    pub capture: Option<PathBuf>,

    /// Write "<source>, <label>, <target>" lines instead of bare addresses
    #[arg(long = "probe-type")]
    pub probe_type: bool,

    /// Write one JSON object per response
    #[arg(long = "json", conflicts_with = "probe_type")]
    pub json: bool,

    /// Hit feedback strategy (region-tree-scan, region-tree-hit, heuristic-prefix)
    #[arg(short = 's', long = "strategy")]
    pub strategy: Option<String>,

    /// Prefix length in bits counted by the heuristic strategy
    #[arg(short = 'm', long = "mask")]
    pub mask: Option<u8>,

    /// Number of regions in the address tree (fingerprints index into it)
    #[arg(short = 'n', long = "nodes", default_value = "0")]
    pub nodes: usize,

    /// File of nibble prefixes (one per line) to count for the heuristic strategy
    #[arg(long = "prefixes")]
    pub prefixes: Option<PathBuf>,

    /// Scan payload signature, hex (default 0x06536361)
    #[arg(long = "signature")]
    pub signature: Option<String>,

    /// Write result lines to a file instead of stdout
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Print a full description of every response to stderr
    #[arg(long = "describe")]
    pub describe: bool,

    /// Print a summary when the capture is exhausted
    #[arg(long = "summary")]
    pub summary: bool,

    /// Remember strategy, mask, signature and output mode as defaults
    #[arg(long = "save-prefs")]
    pub save_prefs: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a hex signature with or without a 0x prefix
pub fn parse_signature(s: &str) -> Result<u32, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("Invalid signature '{}': {}", s, e))
}

impl Args {
    /// Read from stdin rather than a file
    pub fn reads_stdin(&self) -> bool {
        self.capture
            .as_ref()
            .is_none_or(|path| path.as_os_str() == "-")
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref strategy) = self.strategy {
            strategy.parse::<Strategy>()?;
        }

        if let Some(ref signature) = self.signature {
            parse_signature(signature)?;
        }

        if self.prefixes.is_some()
            && self
                .strategy
                .as_deref()
                .is_some_and(|s| s.parse::<Strategy>().is_ok_and(|s| s.uses_region_tree()))
        {
            return Err("--prefixes only applies to the heuristic-prefix strategy".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("scanreply").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert!(args.reads_stdin());
        assert!(!args.probe_type);
        assert_eq!(args.nodes, 0);
        assert_eq!(args.verbose, 0);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_capture_path() {
        assert!(!parse(&["replies.txt"]).reads_stdin());
        assert!(parse(&["-"]).reads_stdin());
    }

    #[test]
    fn test_json_conflicts_with_probe_type() {
        let result = Args::try_parse_from(["scanreply", "--json", "--probe-type"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_verbose_count() {
        assert_eq!(parse(&["-vv"]).verbose, 2);
    }

    #[test]
    fn test_invalid_strategy() {
        let err = parse(&["--strategy", "bfs"]).validate().unwrap_err();
        assert!(err.contains("unknown strategy"));
    }

    #[test]
    fn test_prefixes_require_heuristic() {
        let args = parse(&["--strategy", "region-tree-hit", "--prefixes", "p.txt"]);
        assert!(args.validate().is_err());
        let args = parse(&["--strategy", "heuristic", "--prefixes", "p.txt"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_parse_signature() {
        assert_eq!(parse_signature("0x06536361"), Ok(0x0653_6361));
        assert_eq!(parse_signature("DEADBEEF"), Ok(0xdead_beef));
        assert!(parse_signature("0xnope").is_err());
        assert!(parse_signature("123456789").is_err());
    }
}
