//! # Protocol Configuration & Constants
//!
//! Every protocol-wide constant lives here, next to [`NodeConfig`], the
//! handful of per-node tunables a deployment may want to change.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Wire protocol
// ---------------------------------------------------------------------------

/// Version carried by every session frame. Peers reject frames from a
/// different version rather than guess at their layout.
pub const WIRE_PROTOCOL_VERSION: u16 = 1;

/// Bounded depth of each direction of a session channel. Protocol exchanges
/// are strictly request/reply, so a handful of frames is plenty.
pub const SESSION_CHANNEL_CAPACITY: usize = 16;

/// Capacity of the vault update broadcast. Slow subscribers that lag
/// further than this see `Lagged` and must re-derive from the store.
pub const VAULT_UPDATE_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Coin selection
// ---------------------------------------------------------------------------

/// Number of candidate records fetched per vault page during selection.
pub const DEFAULT_SELECTION_PAGE_SIZE: usize = 200;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// How far into the future an attestation may be valid. A disclosed time
/// window ending later than `now + ATTESTATION_FRESHNESS` is refused.
pub const ATTESTATION_FRESHNESS: Duration = Duration::from_secs(10 * 60);

/// Slack applied around proposal expirations. Offers and accepts must be
/// notarised strictly before `expiration - grace`; the seller may cancel
/// from `expiration + grace` on.
pub const EXPIRATION_GRACE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Per-node configuration
// ---------------------------------------------------------------------------

/// Errors raised while loading a [`NodeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for a single participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Page size used by coin selection.
    pub selection_page_size: usize,
    /// Attestation freshness bound in seconds.
    pub attestation_freshness_secs: u64,
    /// Whether the expiration scheduler runs on this node.
    pub scheduler_enabled: bool,
    /// Per-direction session channel capacity.
    pub session_channel_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            selection_page_size: DEFAULT_SELECTION_PAGE_SIZE,
            attestation_freshness_secs: ATTESTATION_FRESHNESS.as_secs(),
            scheduler_enabled: true,
            session_channel_capacity: SESSION_CHANNEL_CAPACITY,
        }
    }
}

impl NodeConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.selection_page_size == 0 {
            return Err(ConfigError::Invalid(
                "selection_page_size must be at least 1".into(),
            ));
        }
        if self.session_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "session_channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn attestation_freshness(&self) -> Duration {
        Duration::from_secs(self.attestation_freshness_secs)
    }
}
