//! Teams: visibility sub-scopes inside an organization.

use crate::core::error::FleetgateError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::audit::{self, NewAuditEntry};
use crate::plugins::org;
use crate::plugins::rbac::{self, Credentials, Role};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMembership {
    pub id: String,
    pub org_id: String,
    pub team_id: String,
    pub user_id: String,
    pub created_at: i64,
}

fn row_to_team(row: &rusqlite::Row) -> Result<Team, rusqlite::Error> {
    Ok(Team {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_team_membership(row: &rusqlite::Row) -> Result<TeamMembership, rusqlite::Error> {
    Ok(TeamMembership {
        id: row.get(0)?,
        org_id: row.get(1)?,
        team_id: row.get(2)?,
        user_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// A team of `org_id`, or `NotFound` (also across organizations).
pub fn find_team(conn: &Connection, org_id: &str, team_id: &str) -> Result<Team, FleetgateError> {
    conn.query_row(
        "SELECT id, org_id, name, created_at FROM teams WHERE id = ?1 AND org_id = ?2",
        params![team_id, org_id],
        row_to_team,
    )
    .optional()?
    .ok_or_else(|| FleetgateError::NotFound(format!("team {}", team_id)))
}

pub fn create_team(store: &Store, creds: &Credentials, name: &str) -> Result<Team, FleetgateError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FleetgateError::ValidationError(
            "name must not be empty".to_string(),
        ));
    }

    store
        .broker()
        .with_tx(&store.db_path(), "rpc", "teams.create", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Admin)?;
            let team = Team {
                id: time::new_id(),
                org_id: ctx.org_id()?.to_string(),
                name: name.to_string(),
                created_at: time::now_ms(),
            };
            conn.execute(
                "INSERT INTO teams(id, org_id, name, created_at) VALUES(?1, ?2, ?3, ?4)",
                params![team.id, team.org_id, team.name, team.created_at],
            )?;
            audit::append(
                conn,
                &NewAuditEntry::new("create_team", "team")
                    .org(&team.org_id)
                    .user(ctx.user_id())
                    .resource(&team.id)
                    .details(format!("Created team {}", team.name)),
            )?;
            Ok(team)
        })
}

pub fn list_teams(store: &Store, creds: &Credentials) -> Result<Vec<Team>, FleetgateError> {
    store
        .broker()
        .with_conn(&store.db_path(), "rpc", "teams.list", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Viewer)?;
            let mut stmt = conn.prepare(
                "SELECT id, org_id, name, created_at FROM teams WHERE org_id = ?1 ORDER BY name, id",
            )?;
            let rows = stmt.query_map(params![ctx.org_id()?], row_to_team)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
}

pub fn add_team_member(
    store: &Store,
    creds: &Credentials,
    team_id: &str,
    user_id: &str,
) -> Result<TeamMembership, FleetgateError> {
    store
        .broker()
        .with_tx(&store.db_path(), "rpc", "teams.add_member", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Admin)?;
            let org_id = ctx.org_id()?;
            let team = find_team(conn, org_id, team_id)?;

            if org::find_membership(conn, org_id, user_id)?.is_none() {
                return Err(FleetgateError::ValidationError(
                    "User is not a member of this organization".to_string(),
                ));
            }
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM team_memberships WHERE team_id = ?1 AND user_id = ?2",
                    params![team.id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(FleetgateError::Conflict(
                    "User is already on this team".to_string(),
                ));
            }

            let membership = TeamMembership {
                id: time::new_id(),
                org_id: org_id.to_string(),
                team_id: team.id.clone(),
                user_id: user_id.to_string(),
                created_at: time::now_ms(),
            };
            conn.execute(
                "INSERT INTO team_memberships(id, org_id, team_id, user_id, created_at)
                 VALUES(?1, ?2, ?3, ?4, ?5)",
                params![
                    membership.id,
                    membership.org_id,
                    membership.team_id,
                    membership.user_id,
                    membership.created_at
                ],
            )?;
            audit::append(
                conn,
                &NewAuditEntry::new("add_team_member", "team")
                    .org(org_id)
                    .user(ctx.user_id())
                    .resource(&team.id)
                    .details(format!("Added {} to {}", user_id, team.name)),
            )?;
            Ok(membership)
        })
}

/// Remove `membership_id` from `team_id`. A membership that belongs to
/// another team or organization is rejected as `Invalid membership`.
pub fn remove_team_member(
    store: &Store,
    creds: &Credentials,
    team_id: &str,
    membership_id: &str,
) -> Result<(), FleetgateError> {
    store
        .broker()
        .with_tx(&store.db_path(), "rpc", "teams.remove_member", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Admin)?;
            let org_id = ctx.org_id()?;

            let membership = conn
                .query_row(
                    "SELECT id, org_id, team_id, user_id, created_at FROM team_memberships WHERE id = ?1",
                    params![membership_id],
                    row_to_team_membership,
                )
                .optional()?
                .filter(|m| m.team_id == team_id && m.org_id == org_id)
                .ok_or_else(|| FleetgateError::ValidationError("Invalid membership".to_string()))?;

            conn.execute(
                "DELETE FROM team_memberships WHERE id = ?1",
                params![membership.id],
            )?;
            audit::append(
                conn,
                &NewAuditEntry::new("remove_team_member", "team")
                    .org(org_id)
                    .user(ctx.user_id())
                    .resource(team_id)
                    .details(format!("Removed {} from team", membership.user_id)),
            )?;
            Ok(())
        })
}

pub fn list_team_members(
    store: &Store,
    creds: &Credentials,
    team_id: &str,
) -> Result<Vec<TeamMembership>, FleetgateError> {
    store
        .broker()
        .with_conn(&store.db_path(), "rpc", "teams.members", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Viewer)?;
            let team = find_team(conn, ctx.org_id()?, team_id)?;
            let mut stmt = conn.prepare(
                "SELECT id, org_id, team_id, user_id, created_at
                 FROM team_memberships WHERE team_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![team.id], row_to_team_membership)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
}
