//! Hive configuration
//!
//! Defaults cover a single-node, unreplicated hive; deployments override
//! them from a TOML file. The listen address is the only fatal startup
//! input: everything else has a workable default.

use crate::error::{HiveError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7767";

/// Default per-bee input queue capacity.
pub const DEFAULT_BEE_QUEUE_SIZE: usize = 1000;

/// Default control-loop command queue capacity.
pub const DEFAULT_CMD_QUEUE_SIZE: usize = 100;

/// Default outbound broadcast capacity.
pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 10_000;

/// Default cap on one wire frame body.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Node-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    /// Node identity; generated when absent.
    pub hive_id: Option<String>,
    /// Address the stage listener binds. Port 0 asks the OS for a free one.
    pub listen_addr: SocketAddr,
    /// Default replication factor for apps that do not set their own.
    /// Below 2 the commit fast path skips replication entirely.
    pub replication_factor: usize,
    /// Per-bee input queue capacity.
    pub bee_queue_size: usize,
    /// Control-loop command queue capacity.
    pub cmd_queue_size: usize,
    /// Outbound broadcast channel capacity.
    pub outbound_queue_size: usize,
    /// Cap on one wire frame body.
    pub max_frame_size: usize,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            hive_id: None,
            listen_addr: DEFAULT_LISTEN_ADDR.parse().expect("default address parses"),
            replication_factor: 1,
            bee_queue_size: DEFAULT_BEE_QUEUE_SIZE,
            cmd_queue_size: DEFAULT_CMD_QUEUE_SIZE,
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl HiveConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: HiveConfig = toml::from_str(&raw)
            .map_err(|e| HiveError::configuration(format!("invalid TOML: {e}"), None))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the runtime relies on.
    pub fn validate(&self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(HiveError::configuration(
                "replication factor must be at least 1",
                Some("replication_factor"),
            ));
        }
        if self.bee_queue_size == 0 || self.cmd_queue_size == 0 || self.outbound_queue_size == 0 {
            return Err(HiveError::configuration(
                "queue capacities must be non-zero",
                Some("bee_queue_size"),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(HiveError::configuration(
                "frame size cap must be non-zero",
                Some("max_frame_size"),
            ));
        }
        Ok(())
    }
}
