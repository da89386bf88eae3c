//! Quarantine controller and fleet kill switch.
//!
//! Every transition here writes exactly one audit entry inside the same
//! transaction and, once committed, hands a security event to the notifier.
//! Bulk pause/resume run as a single transaction: all records flip or none do.

use crate::core::error::FleetgateError;
use crate::core::notify;
use crate::core::store::Store;
use crate::plugins::access::{self, Visibility};
use crate::plugins::audit::{self, NewAuditEntry};
use crate::plugins::fleet::{self, FleetKind, FleetResource, FleetStatus};
use crate::plugins::rbac::{self, Credentials, Role};
use crate::plugins::team;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseOutcome {
    pub paused: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeOutcome {
    pub resumed: usize,
}

fn require_reason(reason: &str) -> Result<&str, FleetgateError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(FleetgateError::ValidationError(
            "reason must not be empty".to_string(),
        ));
    }
    Ok(reason)
}

fn noun(kind: FleetKind, n: usize) -> &'static str {
    if n == 1 { kind.as_str() } else { kind.plural() }
}

/// Force a record into `quarantined` from any other status.
pub fn quarantine(
    store: &Store,
    creds: &Credentials,
    kind: FleetKind,
    id: &str,
    reason: &str,
) -> Result<FleetResource, FleetgateError> {
    let reason = require_reason(reason)?;
    let op = format!("{}.quarantine", kind.plural());

    let (resource, recorded) = store.broker().with_tx(&store.db_path(), "rpc", &op, |conn| {
        let ctx = rbac::authorize_in_org(store, conn, creds, Role::Operator)?;
        let org_id = ctx.org_id()?;
        let mut resource = fleet::find_in_org(conn, kind, org_id, id)?;
        access::require_team_access(store, conn, &ctx, &resource)?;

        if resource.status == FleetStatus::Quarantined {
            return Err(FleetgateError::Conflict(format!(
                "{} {} is already quarantined",
                kind, id
            )));
        }

        let previous = resource.status;
        fleet::set_status(conn, &mut resource, FleetStatus::Quarantined)?;

        let entry = NewAuditEntry::new(&format!("quarantine_{}", kind), kind.as_str())
            .org(org_id)
            .user(ctx.user_id())
            .resource(&resource.id)
            .details(reason)
            .metadata(serde_json::json!({ "previous_status": previous }));
        audit::append(conn, &entry)?;
        Ok((resource, entry))
    })?;

    tracing::warn!(kind = %kind, id, reason, "resource quarantined");
    notify::dispatch(store.notifier.as_ref(), recorded.to_event());
    Ok(resource)
}

/// Release a quarantined record into the paused state of its kind. The
/// pre-quarantine status is never restored.
pub fn unquarantine(
    store: &Store,
    creds: &Credentials,
    kind: FleetKind,
    id: &str,
    reason: &str,
) -> Result<FleetResource, FleetgateError> {
    let reason = require_reason(reason)?;
    let op = format!("{}.unquarantine", kind.plural());

    let (resource, recorded) = store.broker().with_tx(&store.db_path(), "rpc", &op, |conn| {
        let ctx = rbac::authorize_in_org(store, conn, creds, Role::Operator)?;
        let org_id = ctx.org_id()?;
        let mut resource = fleet::find_in_org(conn, kind, org_id, id)?;
        access::require_team_access(store, conn, &ctx, &resource)?;

        if resource.status != FleetStatus::Quarantined {
            return Err(FleetgateError::Conflict(format!(
                "{} {} is not quarantined",
                kind, id
            )));
        }

        fleet::set_status(conn, &mut resource, kind.paused_status())?;

        let entry = NewAuditEntry::new(&format!("unquarantine_{}", kind), kind.as_str())
            .org(org_id)
            .user(ctx.user_id())
            .resource(&resource.id)
            .details(reason);
        audit::append(conn, &entry)?;
        Ok((resource, entry))
    })?;

    tracing::info!(kind = %kind, id, "resource released from quarantine");
    notify::dispatch(store.notifier.as_ref(), recorded.to_event());
    Ok(resource)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BulkDirection {
    Pause,
    Resume,
}

/// Shared body of the kill switch. Returns the number of records flipped.
fn bulk_flip(
    store: &Store,
    creds: &Credentials,
    kind: FleetKind,
    team_id: Option<&str>,
    direction: BulkDirection,
) -> Result<usize, FleetgateError> {
    let (verb, op_suffix) = match direction {
        BulkDirection::Pause => ("Paused", "pause_all"),
        BulkDirection::Resume => ("Resumed", "resume_all"),
    };
    let op = format!("{}.{}", kind.plural(), op_suffix);

    let (count, recorded) = store.broker().with_tx(&store.db_path(), "rpc", &op, |conn| {
        let ctx = rbac::authorize_in_org(store, conn, creds, Role::Operator)?;
        let org_id = ctx.org_id()?;
        let visibility = Visibility::for_caller(store, conn, &ctx)?;

        if let Some(team_id) = team_id {
            team::find_team(conn, org_id, team_id)?;
            if !visibility.allows_team(Some(team_id)) {
                return Err(FleetgateError::Authorization(
                    "Not a member of this team".to_string(),
                ));
            }
        }

        let mut ids = Vec::new();
        for mut resource in fleet::list_in_org(conn, kind, org_id, team_id)? {
            if !visibility.allows(&resource) || resource.status == FleetStatus::Quarantined {
                continue;
            }
            let target = match direction {
                BulkDirection::Pause if resource.status != kind.paused_status() => {
                    kind.paused_status()
                }
                BulkDirection::Resume if resource.status == kind.paused_status() => {
                    kind.resumed_status()
                }
                _ => continue,
            };
            fleet::set_status(conn, &mut resource, target)?;
            ids.push(resource.id);
        }

        let count = ids.len();
        let entry = NewAuditEntry::new(&format!("{}_{}", op_suffix, kind.plural()), kind.as_str())
            .org(org_id)
            .user(ctx.user_id())
            .details(format!("{} {} {}", verb, count, noun(kind, count)))
            .metadata(serde_json::json!({ "team_id": team_id, "ids": ids }));
        audit::append(conn, &entry)?;
        Ok((count, entry))
    })?;

    tracing::warn!(kind = %kind, team_id, count, op = %op, "kill switch applied");
    notify::dispatch(store.notifier.as_ref(), recorded.to_event());
    Ok(count)
}

/// Pause every visible, non-quarantined record not already paused.
pub fn pause_all(
    store: &Store,
    creds: &Credentials,
    kind: FleetKind,
    team_id: Option<&str>,
) -> Result<PauseOutcome, FleetgateError> {
    bulk_flip(store, creds, kind, team_id, BulkDirection::Pause)
        .map(|paused| PauseOutcome { paused })
}

/// Bring every visible paused record back to its running state.
pub fn resume_all(
    store: &Store,
    creds: &Credentials,
    kind: FleetKind,
    team_id: Option<&str>,
) -> Result<ResumeOutcome, FleetgateError> {
    bulk_flip(store, creds, kind, team_id, BulkDirection::Resume)
        .map(|resumed| ResumeOutcome { resumed })
}
