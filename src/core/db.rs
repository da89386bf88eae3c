use crate::core::broker::DbBroker;
use crate::core::error::FleetgateError;
use crate::core::migration;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

pub fn db_connect(db_path: &Path) -> Result<Connection, FleetgateError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

pub fn console_db_path(root: &Path) -> PathBuf {
    root.join(schemas::CONSOLE_DB_NAME)
}

/// Create the store directory and bring `console.db` to the current schema.
/// Idempotent.
pub fn initialize_console_db(root: &Path) -> Result<(), FleetgateError> {
    fs::create_dir_all(root)?;
    let broker = DbBroker::new(root);
    let db_path = console_db_path(root);

    broker.with_tx(&db_path, "fleetgate", "console.init", |conn| {
        for stmt in schemas::CONSOLE_DB_SCHEMA {
            conn.execute(stmt, [])?;
        }
        migration::run_schema_migrations(conn)?;
        Ok(())
    })?;

    tracing::debug!(path = %db_path.display(), "console database initialized");
    Ok(())
}
