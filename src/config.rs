use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::cli::{Args, parse_signature};
use crate::prefs::Prefs;
use crate::probe::{Classifier, SCAN_SIGNATURE};
use crate::state::{ScanStats, Strategy};

/// Shape of the result lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Responder address only
    #[default]
    Plain,
    /// Responder, classification label and probe target
    ProbeType,
    Json,
}

/// Default heuristic prefix length in bits
pub const DEFAULT_PREFIX_MASK: u8 = 64;

/// Runtime configuration: preferences overridden by CLI args
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub output: OutputMode,
    pub strategy: Strategy,
    /// Prefix length in bits for the heuristic strategy
    pub prefix_mask: u8,
    /// Scan payload signature
    pub signature: u32,
    /// Size of the region node list
    pub node_count: usize,
    pub describe: bool,
    pub summary: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output: OutputMode::Plain,
            strategy: Strategy::default(),
            prefix_mask: DEFAULT_PREFIX_MASK,
            signature: SCAN_SIGNATURE,
            node_count: 0,
            describe: false,
            summary: false,
        }
    }
}

impl Config {
    /// Resolve configuration from saved preferences and CLI args.
    /// Args win; anything neither sets keeps its default.
    pub fn resolve(args: &Args, prefs: &Prefs) -> Result<Self> {
        let defaults = Self::default();

        let output = if args.json {
            OutputMode::Json
        } else if args.probe_type {
            OutputMode::ProbeType
        } else {
            prefs.output.unwrap_or(defaults.output)
        };

        let strategy = match args.strategy {
            Some(ref s) => s.parse::<Strategy>().map_err(anyhow::Error::msg)?,
            None => prefs.strategy.unwrap_or(defaults.strategy),
        };

        let signature = match args.signature {
            Some(ref s) => parse_signature(s).map_err(anyhow::Error::msg)?,
            None => prefs.signature.unwrap_or(defaults.signature),
        };

        let config = Self {
            output,
            strategy,
            prefix_mask: args.mask.or(prefs.prefix_mask).unwrap_or(defaults.prefix_mask),
            signature,
            node_count: args.nodes,
            describe: args.describe,
            summary: args.summary,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefix_mask > 128 {
            bail!("Prefix mask {} exceeds 128 bits", self.prefix_mask);
        }
        // Prefixes are compared as hex nibbles
        if self.prefix_mask % 4 != 0 {
            bail!("Prefix mask {} is not a multiple of 4", self.prefix_mask);
        }
        Ok(())
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.signature)
    }

    /// Fresh aggregation state sized for this scan
    pub fn new_stats(&self) -> ScanStats {
        ScanStats::new(self.strategy, self.prefix_mask, self.node_count)
    }

    /// The subset of this configuration worth remembering
    pub fn to_prefs(&self) -> Prefs {
        Prefs {
            strategy: Some(self.strategy),
            prefix_mask: Some(self.prefix_mask),
            signature: (self.signature != SCAN_SIGNATURE).then_some(self.signature),
            output: Some(self.output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("scanreply").chain(extra.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(&args(&[]), &Prefs::default()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.classifier().signature(), SCAN_SIGNATURE);
    }

    #[test]
    fn test_prefs_fill_gaps() {
        let prefs = Prefs {
            strategy: Some(Strategy::HeuristicPrefix),
            prefix_mask: Some(48),
            signature: None,
            output: Some(OutputMode::ProbeType),
        };
        let config = Config::resolve(&args(&[]), &prefs).unwrap();
        assert_eq!(config.strategy, Strategy::HeuristicPrefix);
        assert_eq!(config.prefix_mask, 48);
        assert_eq!(config.output, OutputMode::ProbeType);
    }

    #[test]
    fn test_args_override_prefs() {
        let prefs = Prefs {
            strategy: Some(Strategy::HeuristicPrefix),
            prefix_mask: Some(48),
            signature: Some(1),
            output: Some(OutputMode::ProbeType),
        };
        let config = Config::resolve(
            &args(&["--json", "-s", "hit", "-m", "32", "--signature", "0xabc", "-n", "9"]),
            &prefs,
        )
        .unwrap();
        assert_eq!(config.output, OutputMode::Json);
        assert_eq!(config.strategy, Strategy::RegionTreeHit);
        assert_eq!(config.prefix_mask, 32);
        assert_eq!(config.signature, 0xabc);
        assert_eq!(config.new_stats().nodes.len(), 9);
    }

    #[test]
    fn test_mask_validation() {
        assert!(Config::resolve(&args(&["-m", "130"]), &Prefs::default()).is_err());
        assert!(Config::resolve(&args(&["-m", "30"]), &Prefs::default()).is_err());
        assert!(Config::resolve(&args(&["-m", "128"]), &Prefs::default()).is_ok());
        assert!(Config::resolve(&args(&["-m", "0"]), &Prefs::default()).is_ok());
    }

    #[test]
    fn test_to_prefs_skips_default_signature() {
        let prefs = Config::default().to_prefs();
        assert_eq!(prefs.signature, None);
        assert_eq!(prefs.strategy, Some(Strategy::RegionTreeScan));
    }
}
