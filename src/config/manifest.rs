//! JSON gateway manifest.
//!
//! The simulator binary reads its settings, channel list and tunables from a
//! single JSON document:
//!
//! ```
//! use lora_star_gate::config::GatewayManifest;
//!
//! let manifest = GatewayManifest::from_json(r#"{
//!     "settings": { "gate_id": 42, "join_key": [1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16] },
//!     "channels": [ { "data_rate": 3, "channel": 0 } ],
//!     "tuning": { "ping_period_ms": 1000 }
//! }"#).unwrap();
//!
//! assert_eq!(manifest.settings.gate_id, 42);
//! assert_eq!(manifest.channels.len(), 1);
//! assert_eq!(manifest.tuning.ping_period_ms, 1000);
//! ```

use super::{ChannelConfig, ConfigError, GatewayConfig, GatewaySettings};
use serde::Deserialize;
use std::path::Path;

/// Everything needed to start a gateway, in one document.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayManifest {
    /// Network settings.
    pub settings: GatewaySettings,
    /// Ordered channel list.
    pub channels: Vec<ChannelConfig>,
    /// Tunables; omitted fields take their defaults.
    #[serde(default)]
    pub tuning: GatewayConfig,
}

impl GatewayManifest {
    /// Parse and validate a manifest.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let manifest: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Manifest(e.to_string()))?;
        if manifest.channels.is_empty() {
            return Err(ConfigError::InvalidConfig("at least one channel is required"));
        }
        manifest.tuning.validate()?;
        Ok(manifest)
    }

    /// Read, parse and validate a manifest file.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Manifest(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(Self::from_json(&json)?)
    }
}
