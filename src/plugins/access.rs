//! Resource access filter: team scoping for callers below admin.
//!
//! Admins see every record of their organization. Everyone else sees
//! untagged records plus records tagged with one of their teams.

use crate::core::error::FleetgateError;
use crate::core::store::Store;
use crate::plugins::rbac::{self, Role};
use crate::plugins::session::AuthContext;
use rusqlite::Connection;
use std::collections::HashSet;

/// A record owned by an organization and optionally tagged with a team.
pub trait TeamScoped {
    fn org_id(&self) -> &str;
    fn team_id(&self) -> Option<&str>;
}

/// What one caller may see inside their bound organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    All,
    Teams(HashSet<String>),
}

impl Visibility {
    pub fn for_caller(
        store: &Store,
        conn: &Connection,
        ctx: &AuthContext,
    ) -> Result<Self, FleetgateError> {
        if store.roles.satisfies(ctx.role_str(), Role::Admin) {
            return Ok(Visibility::All);
        }
        let teams = rbac::team_ids_for_user(conn, ctx.org_id()?, ctx.user_id())?;
        Ok(Visibility::Teams(teams))
    }

    pub fn allows_team(&self, team_id: Option<&str>) -> bool {
        match (self, team_id) {
            (Visibility::All, _) | (_, None) => true,
            (Visibility::Teams(teams), Some(team)) => teams.contains(team),
        }
    }

    pub fn allows<T: TeamScoped>(&self, item: &T) -> bool {
        self.allows_team(item.team_id())
    }
}

/// Narrow `items` to what the caller may see.
pub fn filter_visible<T: TeamScoped>(
    store: &Store,
    conn: &Connection,
    ctx: &AuthContext,
    items: Vec<T>,
) -> Result<Vec<T>, FleetgateError> {
    let visibility = Visibility::for_caller(store, conn, ctx)?;
    if visibility == Visibility::All {
        return Ok(items);
    }
    Ok(items.into_iter().filter(|i| visibility.allows(i)).collect())
}

/// Single-record variant: `None` when the record is absent, belongs to
/// another organization, or is hidden by team scoping. Callers cannot tell
/// these cases apart.
pub fn visible_one<T: TeamScoped>(
    store: &Store,
    conn: &Connection,
    ctx: &AuthContext,
    item: Option<T>,
) -> Result<Option<T>, FleetgateError> {
    let Some(item) = item else {
        return Ok(None);
    };
    if Some(item.org_id()) != ctx.org_id.as_deref() {
        return Ok(None);
    }
    let visibility = Visibility::for_caller(store, conn, ctx)?;
    Ok(visibility.allows(&item).then_some(item))
}

/// Mutation guard for team-tagged records.
pub fn require_team_access<T: TeamScoped>(
    store: &Store,
    conn: &Connection,
    ctx: &AuthContext,
    item: &T,
) -> Result<(), FleetgateError> {
    if Visibility::for_caller(store, conn, ctx)?.allows(item) {
        Ok(())
    } else {
        Err(FleetgateError::Authorization(
            "Not a member of this team".to_string(),
        ))
    }
}
