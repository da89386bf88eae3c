//! Schema version tracking and data migrations for `console.db`.
//!
//! - **Migrations run on init**: a stored version below
//!   [`schemas::CONSOLE_SCHEMA_VERSION`] triggers every newer migration.
//! - **Idempotent migrations**: each one is safe to run twice.
//! - **Version tracking**: `meta.schema_version` holds the applied version.

use crate::core::error::FleetgateError;
use crate::core::schemas;
use rusqlite::{Connection, OptionalExtension, params};

/// Current crate version from Cargo.toml
pub const FLEETGATE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Migration {
    pub target_version: u32,
    pub description: &'static str,
    pub up: fn(&Connection) -> Result<(), FleetgateError>,
}

/// All migrations in chronological order
pub fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        target_version: 2,
        description: "Rewrite legacy 'member' roles to the canonical 'viewer' role",
        up: migrate_legacy_member_role,
    }]
}

pub fn stored_schema_version(conn: &Connection) -> Result<u32, FleetgateError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()).unwrap_or(1))
}

/// Apply every migration newer than the stored version, then record the
/// current version. Runs inside the caller's transaction.
pub fn run_schema_migrations(conn: &Connection) -> Result<u32, FleetgateError> {
    let stored = stored_schema_version(conn)?;
    let mut applied = 0;

    for migration in all_migrations() {
        if migration.target_version > stored {
            tracing::info!(
                target_version = migration.target_version,
                description = migration.description,
                "applying schema migration"
            );
            (migration.up)(conn)?;
            applied += 1;
        }
    }

    conn.execute(
        "INSERT INTO meta(key, value) VALUES('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![schemas::CONSOLE_SCHEMA_VERSION.to_string()],
    )?;
    Ok(applied)
}

// The organization CRUD surface once stored `member`; the RBAC layer never
// recognized it, so such members already failed every role floor. Mapping
// to `viewer` keeps read access and grants nothing new.
fn migrate_legacy_member_role(conn: &Connection) -> Result<(), FleetgateError> {
    conn.execute(
        "UPDATE org_memberships SET role = 'viewer' WHERE role = 'member'",
        [],
    )?;
    conn.execute(
        "UPDATE org_invitations SET role = 'viewer' WHERE role = 'member'",
        [],
    )?;
    Ok(())
}
