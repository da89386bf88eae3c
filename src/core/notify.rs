//! Fire-and-forget notification seam for security events.
//!
//! Delivery to webhooks or alert channels lives outside this crate. The
//! control plane only hands events to a [`Notifier`] after the triggering
//! transaction has committed and never waits for, or fails on, the result.

use crate::core::error::FleetgateError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const NOTIFICATIONS_NAME: &str = "notifications.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityEvent {
    pub event_id: String,
    pub ts: i64,
    pub org_id: Option<String>,
    pub actor_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Option<String>,
}

impl SecurityEvent {
    pub fn new(action: &str, resource_type: &str) -> Self {
        Self {
            event_id: time::new_id(),
            ts: time::now_ms(),
            org_id: None,
            actor_id: None,
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: None,
            details: None,
        }
    }
}

pub trait Notifier: Send + Sync + fmt::Debug {
    fn notify(&self, event: &SecurityEvent) -> Result<(), FleetgateError>;
}

/// Hand an event to the notifier; failures are logged and swallowed.
pub fn dispatch(notifier: &dyn Notifier, event: SecurityEvent) {
    if let Err(e) = notifier.notify(&event) {
        tracing::warn!(action = %event.action, error = %e, "security notification dropped");
    }
}

#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: &SecurityEvent) -> Result<(), FleetgateError> {
        Ok(())
    }
}

/// Appends one JSON line per event to `notifications.jsonl` in the store root.
#[derive(Debug)]
pub struct JsonlNotifier {
    path: PathBuf,
}

impl JsonlNotifier {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(NOTIFICATIONS_NAME),
        }
    }

    pub fn read_all(&self) -> Result<Vec<SecurityEvent>, FleetgateError> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let content = std::fs::read_to_string(&self.path)?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(FleetgateError::from))
            .collect()
    }
}

impl Notifier for JsonlNotifier {
    fn notify(&self, event: &SecurityEvent) -> Result<(), FleetgateError> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{}", serde_json::to_string(event)?)?;
        Ok(())
    }
}
