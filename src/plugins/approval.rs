//! Approval queue: agent-proposed risky actions waiting on a human.
//!
//! `pending` is the only initial state. `approved` and `rejected` are
//! final; `deferred` parks the request and may be decided again later.

use crate::core::error::FleetgateError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::audit::{self, NewAuditEntry};
use crate::plugins::fleet::{self, FleetKind};
use crate::plugins::rbac::{self, Credentials, Role};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Deferred,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Deferred => "deferred",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "deferred" => Some(ApprovalStatus::Deferred),
            _ => None,
        }
    }

    /// Whether `decide` may still move an approval out of this state.
    pub fn is_open(&self) -> bool {
        matches!(self, ApprovalStatus::Pending | ApprovalStatus::Deferred)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    pub org_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub description: String,
    pub action_detail: Option<String>,
    pub risk_level: RiskLevel,
    pub status: ApprovalStatus,
    pub decided_by: Option<String>,
    pub decided_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewApproval {
    pub agent_id: String,
    pub description: String,
    #[serde(default)]
    pub action_detail: Option<String>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalFilter {
    #[serde(default)]
    pub status: Option<ApprovalStatus>,
    #[serde(default)]
    pub user_id: Option<String>,
}

const APPROVAL_COLUMNS: &str = "id, org_id, user_id, agent_id, description, action_detail, \
     risk_level, status, decided_by, decided_at, created_at";

fn invalid_column(idx: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, name.to_string(), rusqlite::types::Type::Text)
}

fn row_to_approval(row: &rusqlite::Row) -> Result<Approval, rusqlite::Error> {
    let risk: String = row.get(6)?;
    let status: String = row.get(7)?;
    Ok(Approval {
        id: row.get(0)?,
        org_id: row.get(1)?,
        user_id: row.get(2)?,
        agent_id: row.get(3)?,
        description: row.get(4)?,
        action_detail: row.get(5)?,
        risk_level: RiskLevel::parse(&risk).ok_or_else(|| invalid_column(6, "risk_level"))?,
        status: ApprovalStatus::parse(&status).ok_or_else(|| invalid_column(7, "status"))?,
        decided_by: row.get(8)?,
        decided_at: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn find(conn: &Connection, id: &str) -> Result<Option<Approval>, FleetgateError> {
    let sql = format!("SELECT {} FROM approvals WHERE id = ?1", APPROVAL_COLUMNS);
    let approval = conn
        .query_row(&sql, params![id], row_to_approval)
        .optional()?;
    Ok(approval)
}

/// Queue a request. Always lands in `pending`; not audited.
pub fn create(
    store: &Store,
    creds: &Credentials,
    input: &NewApproval,
) -> Result<Approval, FleetgateError> {
    if input.description.trim().is_empty() {
        return Err(FleetgateError::ValidationError(
            "description must not be empty".to_string(),
        ));
    }

    store
        .broker()
        .with_tx(&store.db_path(), "rpc", "approvals.create", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Operator)?;
            let org_id = ctx.org_id()?;
            fleet::find_in_org(conn, FleetKind::Agent, org_id, &input.agent_id)?;

            let approval = Approval {
                id: time::new_id(),
                org_id: org_id.to_string(),
                user_id: ctx.user_id().to_string(),
                agent_id: input.agent_id.clone(),
                description: input.description.trim().to_string(),
                action_detail: input.action_detail.clone(),
                risk_level: input.risk_level,
                status: ApprovalStatus::Pending,
                decided_by: None,
                decided_at: None,
                created_at: time::now_ms(),
            };
            conn.execute(
                "INSERT INTO approvals(id, org_id, user_id, agent_id, description, action_detail, risk_level, status, created_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    approval.id,
                    approval.org_id,
                    approval.user_id,
                    approval.agent_id,
                    approval.description,
                    approval.action_detail,
                    approval.risk_level.as_str(),
                    approval.status.as_str(),
                    approval.created_at
                ],
            )?;
            Ok(approval)
        })
}

/// Record a decision. The approval must belong to the caller's bound
/// organization; otherwise it does not exist for them.
pub fn decide(
    store: &Store,
    creds: &Credentials,
    id: &str,
    decision: ApprovalStatus,
) -> Result<Approval, FleetgateError> {
    if decision == ApprovalStatus::Pending {
        return Err(FleetgateError::ValidationError(
            "decision must be approved, rejected or deferred".to_string(),
        ));
    }

    store
        .broker()
        .with_tx(&store.db_path(), "rpc", "approvals.decide", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Operator)?;
            let org_id = ctx.org_id()?;
            let mut approval = find(conn, id)?
                .filter(|a| a.org_id == org_id)
                .ok_or_else(|| FleetgateError::NotFound(format!("approval {}", id)))?;

            if !approval.status.is_open() {
                return Err(FleetgateError::Conflict(format!(
                    "approval {} is already {}",
                    id, approval.status
                )));
            }

            let now = time::now_ms();
            conn.execute(
                "UPDATE approvals SET status = ?1, decided_by = ?2, decided_at = ?3 WHERE id = ?4",
                params![decision.as_str(), ctx.user_id(), now, approval.id],
            )?;
            let previous = approval.status;
            approval.status = decision;
            approval.decided_by = Some(ctx.user_id().to_string());
            approval.decided_at = Some(now);

            audit::append(
                conn,
                &NewAuditEntry::new("decide_approval", "approval")
                    .org(org_id)
                    .user(ctx.user_id())
                    .resource(&approval.id)
                    .details(format!("{} -> {}", previous, decision))
                    .metadata(serde_json::json!({
                        "agent_id": approval.agent_id,
                        "risk_level": approval.risk_level,
                    })),
            )?;
            Ok(approval)
        })
}

/// Approvals of the bound organization, newest first.
pub fn list(
    store: &Store,
    creds: &Credentials,
    filter: &ApprovalFilter,
) -> Result<Vec<Approval>, FleetgateError> {
    store
        .broker()
        .with_conn(&store.db_path(), "rpc", "approvals.list", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Viewer)?;

            let mut sql = format!("SELECT {} FROM approvals WHERE org_id = ?", APPROVAL_COLUMNS);
            let mut args = vec![SqlValue::Text(ctx.org_id()?.to_string())];
            if let Some(status) = filter.status {
                sql.push_str(" AND status = ?");
                args.push(SqlValue::Text(status.as_str().to_string()));
            }
            if let Some(user_id) = &filter.user_id {
                sql.push_str(" AND user_id = ?");
                args.push(SqlValue::Text(user_id.clone()));
            }
            sql.push_str(" ORDER BY created_at DESC, id DESC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), row_to_approval)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
}

/// `None` when absent or owned by another organization.
pub fn get(
    store: &Store,
    creds: &Credentials,
    id: &str,
) -> Result<Option<Approval>, FleetgateError> {
    store
        .broker()
        .with_conn(&store.db_path(), "rpc", "approvals.get", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Viewer)?;
            let org_id = ctx.org_id()?;
            Ok(find(conn, id)?.filter(|a| a.org_id == org_id))
        })
}
