//! Store-level configuration, read from `console.toml` in the store root.
//!
//! A missing file means defaults; a malformed file is an error.

use crate::core::error::FleetgateError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "console.toml";

/// Longest accepted session lifetime: 366 days.
pub const MAX_SESSION_TTL_SECS: i64 = 366 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsoleConfig {
    /// Lifetime of sessions issued by the identity bootstrap.
    pub session_ttl_secs: i64,
    /// Audit page size when the caller gives no limit.
    pub audit_page_size: u32,
    /// Hard ceiling on any audit page.
    pub audit_page_max: u32,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Append security events to `notifications.jsonl`.
    pub notify: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 12 * 60 * 60,
            audit_page_size: 50,
            audit_page_max: 500,
            log_level: "info".to_string(),
            notify: true,
        }
    }
}

impl ConsoleConfig {
    pub fn load(root: &Path) -> Result<Self, FleetgateError> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        let config: ConsoleConfig =
            toml::from_str(&content).map_err(|e| FleetgateError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), FleetgateError> {
        if self.session_ttl_secs <= 0 || self.session_ttl_secs > MAX_SESSION_TTL_SECS {
            return Err(FleetgateError::ConfigError(format!(
                "session_ttl_secs must be between 1 and {}",
                MAX_SESSION_TTL_SECS
            )));
        }
        if self.audit_page_size == 0 || self.audit_page_size > self.audit_page_max {
            return Err(FleetgateError::ConfigError(
                "audit_page_size must be between 1 and audit_page_max".to_string(),
            ));
        }
        Ok(())
    }

    /// Clamp a caller-supplied page size into `1..=audit_page_max`.
    pub fn page_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.audit_page_size)
            .clamp(1, self.audit_page_max)
    }
}
