//! Permission evaluator: ordered roles, the entry-point permission wrapper,
//! and team membership lookup for visibility.

use crate::core::error::FleetgateError;
use crate::core::store::Store;
use crate::plugins::session::{self, AuthContext};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
    Owner,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Viewer, Role::Operator, Role::Admin, Role::Owner];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Operator => "operator",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = FleetgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(Role::Viewer),
            "operator" => Ok(Role::Operator),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            "member" => Err(FleetgateError::ValidationError(
                "role 'member' is not part of the role vocabulary; use viewer or operator"
                    .to_string(),
            )),
            other => Err(FleetgateError::ValidationError(format!(
                "unknown role '{}'",
                other
            ))),
        }
    }
}

const STANDARD_LEVELS: &[(&str, i32)] = &[
    ("viewer", 0),
    ("operator", 1),
    ("admin", 2),
    ("owner", 3),
];

/// Immutable role hierarchy. Built once and carried by the [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleTable {
    levels: &'static [(&'static str, i32)],
}

impl Default for RoleTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl RoleTable {
    /// `viewer:0 < operator:1 < admin:2 < owner:3`
    pub const fn standard() -> Self {
        Self {
            levels: STANDARD_LEVELS,
        }
    }

    /// Level of a stored role string; unknown roles are `-1`.
    pub fn level(&self, role: &str) -> i32 {
        self.levels
            .iter()
            .find(|(name, _)| *name == role)
            .map(|(_, level)| *level)
            .unwrap_or(-1)
    }

    pub fn has_permission(&self, actual: &str, required: &str) -> bool {
        self.level(actual) >= self.level(required)
    }

    pub fn satisfies(&self, actual: &str, required: Role) -> bool {
        self.has_permission(actual, required.as_str())
    }
}

/// `level(actual) >= level(required)` over the standard table.
pub fn has_permission(actual: &str, required: &str) -> bool {
    RoleTable::standard().has_permission(actual, required)
}

/// What the caller presented: a bearer token and, optionally, an org to act in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
    pub org_id: Option<String>,
}

impl Credentials {
    pub fn new(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            org_id: None,
        }
    }

    pub fn in_org(token: &str, org_id: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            org_id: Some(org_id.to_string()),
        }
    }
}

/// Entry wrapper for every operation: resolve the session, then, only when
/// a membership was bound and a floor declared, enforce the floor.
pub fn authorize(
    store: &Store,
    conn: &Connection,
    creds: &Credentials,
    required: Option<Role>,
) -> Result<AuthContext, FleetgateError> {
    let ctx = session::resolve(conn, creds.token.as_deref(), creds.org_id.as_deref())?;

    if let (Some(member), Some(required)) = (&ctx.member, required) {
        if !store.roles.satisfies(&member.role, required) {
            tracing::debug!(
                user_id = %ctx.user.id,
                role = %member.role,
                required = %required,
                "permission denied"
            );
            return Err(FleetgateError::Authorization(format!(
                "requires {} access",
                required
            )));
        }
    }

    Ok(ctx)
}

/// Like [`authorize`] for operations that only make sense inside an org.
pub fn authorize_in_org(
    store: &Store,
    conn: &Connection,
    creds: &Credentials,
    required: Role,
) -> Result<AuthContext, FleetgateError> {
    if creds.org_id.is_none() {
        return Err(FleetgateError::ValidationError(
            "orgId is required".to_string(),
        ));
    }
    authorize(store, conn, creds, Some(required))
}

/// Team ids the user belongs to inside one organization. Visibility only;
/// never grants role-based permission.
pub fn team_ids_for_user(
    conn: &Connection,
    org_id: &str,
    user_id: &str,
) -> Result<HashSet<String>, FleetgateError> {
    let mut stmt =
        conn.prepare("SELECT team_id FROM team_memberships WHERE org_id = ?1 AND user_id = ?2")?;
    let rows = stmt.query_map(params![org_id, user_id], |row| row.get::<_, String>(0))?;
    let mut out = HashSet::new();
    for r in rows {
        out.insert(r?);
    }
    Ok(out)
}
