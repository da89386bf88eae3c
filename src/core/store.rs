//! Store handle: the root directory of a console deployment plus the
//! collaborators every operation needs.

use crate::core::broker::DbBroker;
use crate::core::config::ConsoleConfig;
use crate::core::db;
use crate::core::error::FleetgateError;
use crate::core::notify::{JsonlNotifier, Notifier, NullNotifier};
use crate::plugins::rbac::RoleTable;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A Store is a logical container for `console.db`, its config and its
/// event logs. All control-plane state is scoped to a store.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the store root directory
    pub root: PathBuf,
    pub config: ConsoleConfig,
    /// Role hierarchy used by every permission check.
    pub roles: RoleTable,
    pub notifier: Arc<dyn Notifier>,
}

impl Store {
    /// Open (and initialize if needed) the store at `root`.
    pub fn open(root: &Path) -> Result<Self, FleetgateError> {
        db::initialize_console_db(root)?;
        let config = ConsoleConfig::load(root)?;
        let notifier: Arc<dyn Notifier> = if config.notify {
            Arc::new(JsonlNotifier::new(root))
        } else {
            Arc::new(NullNotifier)
        };
        Ok(Self {
            root: root.to_path_buf(),
            config,
            roles: RoleTable::standard(),
            notifier,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn db_path(&self) -> PathBuf {
        db::console_db_path(&self.root)
    }

    pub fn broker(&self) -> DbBroker {
        DbBroker::new(&self.root)
    }
}
