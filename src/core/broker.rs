use crate::core::db;
use crate::core::error::FleetgateError;
use crate::core::time;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const BROKER_EVENTS_NAME: &str = "broker.events.jsonl";

/// The DB Broker is the single path to console state.
///
/// Reads go through [`DbBroker::with_conn`]; every mutation goes through
/// [`DbBroker::with_tx`], which wraps the session check, the permission
/// check, the mutation and its audit append in one immediate transaction.
/// Any error rolls the whole unit back.
pub struct DbBroker {
    event_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub mode: String,
    pub status: String,
}

// Writers in this process serialize here; SQLite locking covers other processes.
static WRITE_LOCK: Mutex<()> = Mutex::new(());

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            event_log_path: root.join(BROKER_EVENTS_NAME),
        }
    }

    /// Execute a read-only closure against a fresh connection.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        f: F,
    ) -> Result<R, FleetgateError>
    where
        F: FnOnce(&Connection) -> Result<R, FleetgateError>,
    {
        let conn = db::db_connect(db_path)?;
        let result = f(&conn);
        self.record(actor, op_name, db_path, "read", result.is_ok());
        result
    }

    /// Execute a closure inside one transaction; commit on `Ok`, roll back on `Err`.
    pub fn with_tx<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        f: F,
    ) -> Result<R, FleetgateError>
    where
        F: FnOnce(&Connection) -> Result<R, FleetgateError>,
    {
        let _lock = WRITE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut conn = db::db_connect(db_path)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let result = match f(&tx) {
            Ok(value) => tx.commit().map(|_| value).map_err(FleetgateError::from),
            Err(e) => {
                // Dropping the transaction rolls it back.
                drop(tx);
                tracing::debug!(op = op_name, error = %e, "transaction rolled back");
                Err(e)
            }
        };

        self.record(actor, op_name, db_path, "write", result.is_ok());
        result
    }

    // Runs once the outcome is final; a failed append never changes it.
    fn record(&self, actor: &str, op: &str, db_path: &Path, mode: &str, ok: bool) {
        if let Err(e) = self.log_event(actor, op, db_path, mode, ok) {
            tracing::warn!(op, mode, error = %e, "failed to append broker event");
        }
    }

    fn log_event(
        &self,
        actor: &str,
        op: &str,
        db_path: &Path,
        mode: &str,
        ok: bool,
    ) -> Result<(), FleetgateError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id: db_path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            mode: mode.to_string(),
            status: if ok { "success" } else { "error" }.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.event_log_path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }
}

/// Read the last `n` brokered events, oldest first.
pub fn read_events(root: &Path, n: usize) -> Result<Vec<BrokerEvent>, FleetgateError> {
    let path = root.join(BROKER_EVENTS_NAME);
    if !path.exists() {
        return Ok(vec![]);
    }
    let content = std::fs::read_to_string(path)?;
    let mut events = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        events.push(serde_json::from_str::<BrokerEvent>(line)?);
    }
    let start = events.len().saturating_sub(n);
    Ok(events.split_off(start))
}
