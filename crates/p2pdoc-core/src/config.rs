//! Process-wide configuration (spec §6).
//!
//! Every actor receives its configuration from one process-wide
//! [`NodeConfig`], read once at startup and never reloaded. Sources are
//! layered low-to-high: built-in defaults, then an optional TOML file, then
//! explicit overrides (CLI flags in `p2pdoc-node`), following the
//! `ConfigSource`/priority convention `aura_core::config::loader` uses for
//! merging file and CLI configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FatalResourceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This peer's id, e.g. `"alice@10.0.0.1"`. Required in practice; the
    /// default is only used so `NodeConfig` can implement `Default`.
    pub peer_id: String,
    /// Directory the plain-text autosave file is written under.
    pub save_dir: PathBuf,
    /// Number of local edits since the last write that triggers an autosave.
    pub autosave_threshold: u32,
    /// `Link` retry interval in milliseconds (spec §4.6 `RETRY`).
    pub retry_interval_ms: u64,
    /// Editor-protocol API port.
    pub api_port: u16,
    /// Front-end static asset bind port.
    pub frontend_port: u16,
    /// Port the peer-to-peer wire transport listens on (spec §6 "peer
    /// runtime"), derived from `peer_id`'s host part at connect time.
    pub wire_port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: String::new(),
            save_dir: PathBuf::from("./data"),
            autosave_threshold: 20,
            retry_interval_ms: 5_000,
            api_port: 4000,
            frontend_port: 3000,
            wire_port: 6000,
        }
    }
}

impl NodeConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Path the autosave file for this peer is written to.
    pub fn save_path(&self) -> PathBuf {
        let filename = self
            .peer_id
            .replace(['@', '.'], "_");
        self.save_dir.join(format!("{filename}.txt"))
    }

    /// Load a TOML config file, falling back to defaults for unset fields.
    pub fn load_from_file(path: &Path) -> Result<Self, FatalResourceError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| FatalResourceError::AutosaveFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        toml::from_str(&contents).map_err(|e| FatalResourceError::AutosaveFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_ports() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.api_port, 4000);
        assert_eq!(cfg.frontend_port, 3000);
    }

    #[test]
    fn save_path_sanitizes_peer_id() {
        let mut cfg = NodeConfig::default();
        cfg.peer_id = "alice@10.0.0.1".to_string();
        assert_eq!(cfg.save_path(), PathBuf::from("./data/alice_10_0_0_1.txt"));
    }
}
