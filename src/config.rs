//! Engine configuration.
//!
//! The configuration surface is limited to constructor options: history cap,
//! default debounce window, and the schema version documents are migrated to.

use serde::{Deserialize, Serialize};

use crate::error::{BoardkitError, Result};
use crate::state::migration::CURRENT_SCHEMA_VERSION;

/// Default number of history entries kept before the oldest is evicted.
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// Constructor options for [`crate::BoardEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum number of history entries.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Debounce window applied when a mutation captures history without
    /// specifying its own. Zero disables debouncing.
    #[serde(default)]
    pub default_debounce_ms: u64,

    /// Schema version loaded documents are migrated to.
    #[serde(default = "default_target_version")]
    pub target_version: u32,
}

fn default_history_cap() -> usize {
    DEFAULT_HISTORY_CAP
}

fn default_target_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_cap: DEFAULT_HISTORY_CAP,
            default_debounce_ms: 0,
            target_version: CURRENT_SCHEMA_VERSION,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON, filling missing fields with defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap;
        self
    }

    pub fn with_default_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.default_debounce_ms = debounce_ms;
        self
    }

    pub fn with_target_version(mut self, version: u32) -> Self {
        self.target_version = version;
        self
    }

    /// Check the options are usable.
    pub fn validate(&self) -> Result<()> {
        if self.history_cap == 0 {
            return Err(BoardkitError::InvalidConfig {
                reason: "history cap must be at least 1".to_string(),
            });
        }
        if self.target_version == 0 || self.target_version > CURRENT_SCHEMA_VERSION {
            return Err(BoardkitError::InvalidConfig {
                reason: format!(
                    "target version {} outside supported range 1..={}",
                    self.target_version, CURRENT_SCHEMA_VERSION
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.history_cap, 100);
        assert_eq!(config.default_debounce_ms, 0);
        assert_eq!(config.target_version, CURRENT_SCHEMA_VERSION);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = EngineConfig::from_json_str(r#"{"historyCap": 20}"#).unwrap();
        assert_eq!(config.history_cap, 20);
        assert_eq!(config.target_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_rejects_zero_cap() {
        let err = EngineConfig::from_json_str(r#"{"historyCap": 0}"#).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_rejects_future_target() {
        let config = EngineConfig::default().with_target_version(CURRENT_SCHEMA_VERSION + 1);
        assert!(config.validate().is_err());
    }
}
