//! Fleet registry: agents and the instances that run them.
//!
//! Both kinds share one record shape and differ only in their status
//! vocabulary. `quarantined` is entered and left exclusively through
//! [`crate::plugins::quarantine`].

use crate::core::error::FleetgateError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::access::{self, TeamScoped};
use crate::plugins::audit::{self, NewAuditEntry};
use crate::plugins::rbac::{self, Credentials, Role};
use crate::plugins::team;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FleetKind {
    Agent,
    Instance,
}

impl FleetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FleetKind::Agent => "agent",
            FleetKind::Instance => "instance",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            FleetKind::Agent => "agents",
            FleetKind::Instance => "instances",
        }
    }

    fn table(&self) -> &'static str {
        self.plural()
    }

    /// Statuses a record of this kind may hold.
    pub fn statuses(&self) -> &'static [FleetStatus] {
        match self {
            FleetKind::Agent => &[
                FleetStatus::Idle,
                FleetStatus::Active,
                FleetStatus::Error,
                FleetStatus::Paused,
                FleetStatus::Quarantined,
            ],
            FleetKind::Instance => &[
                FleetStatus::Online,
                FleetStatus::Offline,
                FleetStatus::Provisioning,
                FleetStatus::Error,
                FleetStatus::Quarantined,
            ],
        }
    }

    pub fn allows(&self, status: FleetStatus) -> bool {
        self.statuses().contains(&status)
    }

    pub fn initial_status(&self) -> FleetStatus {
        match self {
            FleetKind::Agent => FleetStatus::Idle,
            FleetKind::Instance => FleetStatus::Provisioning,
        }
    }

    /// Target of a kill-switch pause, and where unquarantine lands.
    pub fn paused_status(&self) -> FleetStatus {
        match self {
            FleetKind::Agent => FleetStatus::Paused,
            FleetKind::Instance => FleetStatus::Offline,
        }
    }

    pub fn resumed_status(&self) -> FleetStatus {
        match self {
            FleetKind::Agent => FleetStatus::Active,
            FleetKind::Instance => FleetStatus::Online,
        }
    }
}

impl fmt::Display for FleetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FleetStatus {
    Idle,
    Active,
    Error,
    Paused,
    Quarantined,
    Online,
    Offline,
    Provisioning,
}

impl FleetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FleetStatus::Idle => "idle",
            FleetStatus::Active => "active",
            FleetStatus::Error => "error",
            FleetStatus::Paused => "paused",
            FleetStatus::Quarantined => "quarantined",
            FleetStatus::Online => "online",
            FleetStatus::Offline => "offline",
            FleetStatus::Provisioning => "provisioning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(FleetStatus::Idle),
            "active" => Some(FleetStatus::Active),
            "error" => Some(FleetStatus::Error),
            "paused" => Some(FleetStatus::Paused),
            "quarantined" => Some(FleetStatus::Quarantined),
            "online" => Some(FleetStatus::Online),
            "offline" => Some(FleetStatus::Offline),
            "provisioning" => Some(FleetStatus::Provisioning),
            _ => None,
        }
    }
}

impl fmt::Display for FleetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetResource {
    pub id: String,
    pub kind: FleetKind,
    pub org_id: String,
    pub team_id: Option<String>,
    pub name: String,
    pub status: FleetStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TeamScoped for FleetResource {
    fn org_id(&self) -> &str {
        &self.org_id
    }

    fn team_id(&self) -> Option<&str> {
        self.team_id.as_deref()
    }
}

fn row_to_resource(
    kind: FleetKind,
    row: &rusqlite::Row,
) -> Result<FleetResource, rusqlite::Error> {
    let status: String = row.get(4)?;
    Ok(FleetResource {
        id: row.get(0)?,
        kind,
        org_id: row.get(1)?,
        team_id: row.get(2)?,
        name: row.get(3)?,
        status: FleetStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(4, "status".to_string(), rusqlite::types::Type::Text)
        })?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Record by id, regardless of organization.
pub fn find(
    conn: &Connection,
    kind: FleetKind,
    id: &str,
) -> Result<Option<FleetResource>, FleetgateError> {
    let sql = format!(
        "SELECT id, org_id, team_id, name, status, created_at, updated_at FROM {} WHERE id = ?1",
        kind.table()
    );
    let resource = conn
        .query_row(&sql, params![id], |row| row_to_resource(kind, row))
        .optional()?;
    Ok(resource)
}

/// Record by id inside `org_id`; absence and cross-org ids are both `NotFound`.
pub fn find_in_org(
    conn: &Connection,
    kind: FleetKind,
    org_id: &str,
    id: &str,
) -> Result<FleetResource, FleetgateError> {
    find(conn, kind, id)?
        .filter(|r| r.org_id == org_id)
        .ok_or_else(|| FleetgateError::NotFound(format!("{} {}", kind, id)))
}

/// Every record of `kind` in the organization, optionally narrowed to one team.
pub fn list_in_org(
    conn: &Connection,
    kind: FleetKind,
    org_id: &str,
    team_id: Option<&str>,
) -> Result<Vec<FleetResource>, FleetgateError> {
    let sql = format!(
        "SELECT id, org_id, team_id, name, status, created_at, updated_at FROM {}
         WHERE org_id = ?1 AND (?2 IS NULL OR team_id = ?2)
         ORDER BY created_at, id",
        kind.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![org_id, team_id], |row| row_to_resource(kind, row))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn set_status(
    conn: &Connection,
    resource: &mut FleetResource,
    status: FleetStatus,
) -> Result<(), FleetgateError> {
    let now = time::now_ms();
    let sql = format!(
        "UPDATE {} SET status = ?1, updated_at = ?2 WHERE id = ?3",
        resource.kind.table()
    );
    conn.execute(&sql, params![status.as_str(), now, resource.id])?;
    resource.status = status;
    resource.updated_at = now;
    Ok(())
}

pub fn create(
    store: &Store,
    creds: &Credentials,
    kind: FleetKind,
    name: &str,
    team_id: Option<&str>,
) -> Result<FleetResource, FleetgateError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FleetgateError::ValidationError(
            "name must not be empty".to_string(),
        ));
    }

    let op = format!("{}.create", kind.plural());
    store.broker().with_tx(&store.db_path(), "rpc", &op, |conn| {
        let ctx = rbac::authorize_in_org(store, conn, creds, Role::Operator)?;
        let org_id = ctx.org_id()?;
        if let Some(team_id) = team_id {
            team::find_team(conn, org_id, team_id)?;
        }

        let now = time::now_ms();
        let resource = FleetResource {
            id: time::new_id(),
            kind,
            org_id: org_id.to_string(),
            team_id: team_id.map(str::to_string),
            name: name.to_string(),
            status: kind.initial_status(),
            created_at: now,
            updated_at: now,
        };
        access::require_team_access(store, conn, &ctx, &resource)?;

        let sql = format!(
            "INSERT INTO {}(id, org_id, team_id, name, status, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            kind.table()
        );
        conn.execute(
            &sql,
            params![
                resource.id,
                resource.org_id,
                resource.team_id,
                resource.name,
                resource.status.as_str(),
                resource.created_at,
                resource.updated_at
            ],
        )?;

        audit::append(
            conn,
            &NewAuditEntry::new(&format!("create_{}", kind), kind.as_str())
                .org(org_id)
                .user(ctx.user_id())
                .resource(&resource.id)
                .details(format!("Created {} {}", kind, resource.name)),
        )?;
        Ok(resource)
    })
}

/// `None` for absent, cross-org, or team-hidden records.
pub fn get(
    store: &Store,
    creds: &Credentials,
    kind: FleetKind,
    id: &str,
) -> Result<Option<FleetResource>, FleetgateError> {
    let op = format!("{}.get", kind.plural());
    store.broker().with_conn(&store.db_path(), "rpc", &op, |conn| {
        let ctx = rbac::authorize_in_org(store, conn, creds, Role::Viewer)?;
        access::visible_one(store, conn, &ctx, find(conn, kind, id)?)
    })
}

pub fn list(
    store: &Store,
    creds: &Credentials,
    kind: FleetKind,
    team_id: Option<&str>,
) -> Result<Vec<FleetResource>, FleetgateError> {
    let op = format!("{}.list", kind.plural());
    store.broker().with_conn(&store.db_path(), "rpc", &op, |conn| {
        let ctx = rbac::authorize_in_org(store, conn, creds, Role::Viewer)?;
        let items = list_in_org(conn, kind, ctx.org_id()?, team_id)?;
        access::filter_visible(store, conn, &ctx, items)
    })
}

/// Ordinary lifecycle transition. Quarantine is out of reach here in both
/// directions.
pub fn update_status(
    store: &Store,
    creds: &Credentials,
    kind: FleetKind,
    id: &str,
    status: FleetStatus,
) -> Result<FleetResource, FleetgateError> {
    if !kind.allows(status) {
        return Err(FleetgateError::ValidationError(format!(
            "'{}' is not a valid {} status",
            status, kind
        )));
    }
    if status == FleetStatus::Quarantined {
        return Err(FleetgateError::ValidationError(format!(
            "use {}.quarantine to quarantine a {}",
            kind.plural(),
            kind
        )));
    }

    let op = format!("{}.update_status", kind.plural());
    store.broker().with_tx(&store.db_path(), "rpc", &op, |conn| {
        let ctx = rbac::authorize_in_org(store, conn, creds, Role::Operator)?;
        let org_id = ctx.org_id()?;
        let mut resource = find_in_org(conn, kind, org_id, id)?;
        access::require_team_access(store, conn, &ctx, &resource)?;

        if resource.status == FleetStatus::Quarantined {
            return Err(FleetgateError::Conflict(format!(
                "{} {} is quarantined; unquarantine it first",
                kind, id
            )));
        }

        let previous = resource.status;
        set_status(conn, &mut resource, status)?;
        audit::append(
            conn,
            &NewAuditEntry::new(&format!("update_{}_status", kind), kind.as_str())
                .org(org_id)
                .user(ctx.user_id())
                .resource(&resource.id)
                .details(format!("Status {} -> {}", previous, status)),
        )?;
        Ok(resource)
    })
}
