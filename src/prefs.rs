//! User preferences persistence.
//!
//! Saves scan defaults to ~/.config/scanreply/config.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::config::OutputMode;
use crate::state::Strategy;

/// User preferences
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefs {
    pub strategy: Option<Strategy>,
    /// Heuristic prefix length in bits
    pub prefix_mask: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<u32>,
    pub output: Option<OutputMode>,
}

impl Prefs {
    /// Get config file path: ~/.config/scanreply/config.toml
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("scanreply").join("config.toml"))
    }

    /// Load preferences from disk (returns default if missing/invalid)
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save preferences to disk
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(path) = Self::path() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, toml::to_string_pretty(self)?)?;
        }
        Ok(())
    }
}
