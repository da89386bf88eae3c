//! Fleetgate RPC interface.
//!
//! Clients send one JSON request per call and get one JSON response back.
//! Every operation is either a query (read-only) or a mutation, and each one
//! deserializes `params` into its own typed struct that rejects unknown
//! fields. Errors come back as `{code, message}` with a stable code.

use crate::core::error::FleetgateError;
use crate::core::store::Store;
use crate::core::time;
use crate::core::trace::{self, TraceEvent};
use crate::plugins::approval::{self, ApprovalFilter, ApprovalStatus, NewApproval};
use crate::plugins::audit::{self, AuditFilter};
use crate::plugins::fleet::{self, FleetKind, FleetStatus};
use crate::plugins::org;
use crate::plugins::quarantine;
use crate::plugins::rbac::{Credentials, Role};
use crate::plugins::session;
use crate::plugins::team;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Query,
    Mutation,
}

/// Standard RPC request envelope
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RpcRequest {
    pub op: String,
    /// Optional; when given it must match the operation's kind.
    #[serde(default)]
    pub kind: Option<OpKind>,
    #[serde(default)]
    pub params: Value,
    /// Request ID for correlation
    #[serde(default = "default_request_id")]
    pub id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
}

pub fn default_request_id() -> String {
    time::new_id()
}

impl RpcRequest {
    pub fn new(op: &str, params: Value) -> Self {
        Self {
            op: op.to_string(),
            kind: None,
            params,
            id: default_request_id(),
            token: None,
            org_id: None,
        }
    }

    pub fn with_credentials(mut self, creds: &Credentials) -> Self {
        self.token = creds.token.clone();
        self.org_id = creds.org_id.clone();
        self
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            token: self.token.clone(),
            org_id: self.org_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

impl From<&FleetgateError> for RpcError {
    fn from(e: &FleetgateError) -> Self {
        // Infrastructure detail stays in the logs.
        let message = if e.is_client_error() {
            e.to_string()
        } else {
            "internal error".to_string()
        };
        Self {
            code: e.code().to_string(),
            message,
        }
    }
}

/// Standard RPC response envelope
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcResponse {
    pub id: String,
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<OpKind>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

const OPS: &[(&str, OpKind)] = &[
    ("session.whoami", OpKind::Query),
    ("session.revoke", OpKind::Mutation),
    ("organizations.create", OpKind::Mutation),
    ("organizations.get", OpKind::Query),
    ("organizations.members", OpKind::Query),
    ("organizations.add_member", OpKind::Mutation),
    ("organizations.update_member_role", OpKind::Mutation),
    ("organizations.remove_member", OpKind::Mutation),
    ("organizations.set_require_mfa", OpKind::Mutation),
    ("organizations.invite", OpKind::Mutation),
    ("organizations.invitations", OpKind::Query),
    ("organizations.accept_invitation", OpKind::Mutation),
    ("organizations.revoke_invitation", OpKind::Mutation),
    ("teams.create", OpKind::Mutation),
    ("teams.list", OpKind::Query),
    ("teams.add_member", OpKind::Mutation),
    ("teams.remove_member", OpKind::Mutation),
    ("teams.members", OpKind::Query),
    ("agents.create", OpKind::Mutation),
    ("agents.get", OpKind::Query),
    ("agents.list", OpKind::Query),
    ("agents.update_status", OpKind::Mutation),
    ("agents.quarantine", OpKind::Mutation),
    ("agents.unquarantine", OpKind::Mutation),
    ("agents.pause_all", OpKind::Mutation),
    ("agents.resume_all", OpKind::Mutation),
    ("instances.create", OpKind::Mutation),
    ("instances.get", OpKind::Query),
    ("instances.list", OpKind::Query),
    ("instances.update_status", OpKind::Mutation),
    ("instances.quarantine", OpKind::Mutation),
    ("instances.unquarantine", OpKind::Mutation),
    ("instances.pause_all", OpKind::Mutation),
    ("instances.resume_all", OpKind::Mutation),
    ("approvals.create", OpKind::Mutation),
    ("approvals.decide", OpKind::Mutation),
    ("approvals.list", OpKind::Query),
    ("approvals.get", OpKind::Query),
    ("audit.list", OpKind::Query),
    ("audit.export", OpKind::Mutation),
];

pub fn op_kind(op: &str) -> Option<OpKind> {
    OPS.iter().find(|(name, _)| *name == op).map(|(_, kind)| *kind)
}

pub fn operations() -> impl Iterator<Item = (&'static str, OpKind)> {
    OPS.iter().copied()
}

// --- Typed params ---

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdParams {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateOrgParams {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMemberParams {
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMemberRoleParams {
    pub membership_id: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MembershipParams {
    pub membership_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequireMfaParams {
    pub require_mfa: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InviteParams {
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvitationParams {
    pub invitation_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTeamParams {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeamParams {
    pub team_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddTeamMemberParams {
    pub team_id: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveTeamMemberParams {
    pub team_id: String,
    pub membership_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateFleetParams {
    pub name: String,
    #[serde(default)]
    pub team_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeamScopeParams {
    #[serde(default)]
    pub team_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateStatusParams {
    pub id: String,
    pub status: FleetStatus,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuarantineParams {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecideParams {
    pub id: String,
    pub status: ApprovalStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditListParams {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Deserialize `params` for `op`. A missing `params` reads as `{}`.
pub fn parse_params<T: DeserializeOwned>(op: &str, params: &Value) -> Result<T, FleetgateError> {
    let value = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| FleetgateError::ValidationError(format!("invalid params for {}: {}", op, e)))
}

fn to_value<T: Serialize>(value: T) -> Result<Value, FleetgateError> {
    Ok(serde_json::to_value(value)?)
}

fn fleet_kind(prefix: &str) -> Option<FleetKind> {
    match prefix {
        "agents" => Some(FleetKind::Agent),
        "instances" => Some(FleetKind::Instance),
        _ => None,
    }
}

fn dispatch_fleet(
    store: &Store,
    creds: &Credentials,
    kind: FleetKind,
    action: &str,
    op: &str,
    params: &Value,
) -> Result<Value, FleetgateError> {
    match action {
        "create" => {
            let p: CreateFleetParams = parse_params(op, params)?;
            to_value(fleet::create(store, creds, kind, &p.name, p.team_id.as_deref())?)
        }
        "get" => {
            let p: IdParams = parse_params(op, params)?;
            to_value(fleet::get(store, creds, kind, &p.id)?)
        }
        "list" => {
            let p: TeamScopeParams = parse_params(op, params)?;
            to_value(fleet::list(store, creds, kind, p.team_id.as_deref())?)
        }
        "update_status" => {
            let p: UpdateStatusParams = parse_params(op, params)?;
            to_value(fleet::update_status(store, creds, kind, &p.id, p.status)?)
        }
        "quarantine" => {
            let p: QuarantineParams = parse_params(op, params)?;
            to_value(quarantine::quarantine(store, creds, kind, &p.id, &p.reason)?)
        }
        "unquarantine" => {
            let p: QuarantineParams = parse_params(op, params)?;
            to_value(quarantine::unquarantine(store, creds, kind, &p.id, &p.reason)?)
        }
        "pause_all" => {
            let p: TeamScopeParams = parse_params(op, params)?;
            to_value(quarantine::pause_all(store, creds, kind, p.team_id.as_deref())?)
        }
        "resume_all" => {
            let p: TeamScopeParams = parse_params(op, params)?;
            to_value(quarantine::resume_all(store, creds, kind, p.team_id.as_deref())?)
        }
        _ => Err(FleetgateError::ValidationError(format!("unknown op '{}'", op))),
    }
}

/// Route a request to its operation and return the serialized result.
pub fn dispatch(store: &Store, req: &RpcRequest) -> Result<Value, FleetgateError> {
    let op = req.op.as_str();
    let expected = op_kind(op)
        .ok_or_else(|| FleetgateError::ValidationError(format!("unknown op '{}'", op)))?;
    if let Some(kind) = req.kind {
        if kind != expected {
            return Err(FleetgateError::ValidationError(format!(
                "'{}' is a {:?}, not a {:?}",
                op, expected, kind
            )));
        }
    }

    let creds = req.credentials();
    let params = &req.params;

    if let Some((prefix, action)) = op.split_once('.') {
        if let Some(kind) = fleet_kind(prefix) {
            return dispatch_fleet(store, &creds, kind, action, op, params);
        }
    }

    match op {
        "session.whoami" => {
            let _: NoParams = parse_params(op, params)?;
            to_value(session::whoami(store, req.token.as_deref(), req.org_id.as_deref())?)
        }
        "session.revoke" => {
            let _: NoParams = parse_params(op, params)?;
            session::revoke_session(store, req.token.as_deref())?;
            Ok(serde_json::json!({ "revoked": true }))
        }
        "organizations.create" => {
            let p: CreateOrgParams = parse_params(op, params)?;
            to_value(org::create_org(store, &creds, &p.name, &p.slug)?)
        }
        "organizations.get" => {
            let _: NoParams = parse_params(op, params)?;
            to_value(org::get_org(store, &creds)?)
        }
        "organizations.members" => {
            let _: NoParams = parse_params(op, params)?;
            to_value(org::list_members(store, &creds)?)
        }
        "organizations.add_member" => {
            let p: AddMemberParams = parse_params(op, params)?;
            to_value(org::add_member(store, &creds, &p.user_id, p.role)?)
        }
        "organizations.update_member_role" => {
            let p: UpdateMemberRoleParams = parse_params(op, params)?;
            to_value(org::update_member_role(store, &creds, &p.membership_id, p.role)?)
        }
        "organizations.remove_member" => {
            let p: MembershipParams = parse_params(op, params)?;
            org::remove_member(store, &creds, &p.membership_id)?;
            Ok(serde_json::json!({ "removed": true }))
        }
        "organizations.set_require_mfa" => {
            let p: RequireMfaParams = parse_params(op, params)?;
            to_value(org::set_require_mfa(store, &creds, p.require_mfa)?)
        }
        "organizations.invite" => {
            let p: InviteParams = parse_params(op, params)?;
            to_value(org::invite(store, &creds, &p.email, p.role)?)
        }
        "organizations.invitations" => {
            let _: NoParams = parse_params(op, params)?;
            to_value(org::list_invitations(store, &creds)?)
        }
        "organizations.accept_invitation" => {
            let p: InvitationParams = parse_params(op, params)?;
            to_value(org::accept_invitation(store, &creds, &p.invitation_id)?)
        }
        "organizations.revoke_invitation" => {
            let p: InvitationParams = parse_params(op, params)?;
            to_value(org::revoke_invitation(store, &creds, &p.invitation_id)?)
        }
        "teams.create" => {
            let p: CreateTeamParams = parse_params(op, params)?;
            to_value(team::create_team(store, &creds, &p.name)?)
        }
        "teams.list" => {
            let _: NoParams = parse_params(op, params)?;
            to_value(team::list_teams(store, &creds)?)
        }
        "teams.add_member" => {
            let p: AddTeamMemberParams = parse_params(op, params)?;
            to_value(team::add_team_member(store, &creds, &p.team_id, &p.user_id)?)
        }
        "teams.remove_member" => {
            let p: RemoveTeamMemberParams = parse_params(op, params)?;
            team::remove_team_member(store, &creds, &p.team_id, &p.membership_id)?;
            Ok(serde_json::json!({ "removed": true }))
        }
        "teams.members" => {
            let p: TeamParams = parse_params(op, params)?;
            to_value(team::list_team_members(store, &creds, &p.team_id)?)
        }
        "approvals.create" => {
            let p: NewApproval = parse_params(op, params)?;
            to_value(approval::create(store, &creds, &p)?)
        }
        "approvals.decide" => {
            let p: DecideParams = parse_params(op, params)?;
            to_value(approval::decide(store, &creds, &p.id, p.status)?)
        }
        "approvals.list" => {
            let p: ApprovalFilter = parse_params(op, params)?;
            to_value(approval::list(store, &creds, &p)?)
        }
        "approvals.get" => {
            let p: IdParams = parse_params(op, params)?;
            to_value(approval::get(store, &creds, &p.id)?)
        }
        "audit.list" => {
            let p: AuditListParams = parse_params(op, params)?;
            let filter = AuditFilter {
                action: p.action,
                resource_type: p.resource_type,
                user_id: p.user_id,
            };
            to_value(audit::list(store, &creds, &filter, p.cursor.as_deref(), p.limit)?)
        }
        "audit.export" => {
            let _: NoParams = parse_params(op, params)?;
            to_value(audit::export_to_store(store, &creds)?)
        }
        _ => Err(FleetgateError::ValidationError(format!("unknown op '{}'", op))),
    }
}

/// Handle one request end to end: dispatch, shape the envelope, trace it.
pub fn handle(store: &Store, req: RpcRequest) -> RpcResponse {
    let kind = op_kind(&req.op);
    let response = match dispatch(store, &req) {
        Ok(result) => RpcResponse {
            id: req.id.clone(),
            op: req.op.clone(),
            kind,
            success: true,
            result: Some(result),
            error: None,
        },
        Err(e) => {
            if e.is_client_error() {
                tracing::info!(op = %req.op, code = e.code(), error = %e, "rpc rejected");
            } else {
                tracing::error!(op = %req.op, error = %e, "rpc failed");
            }
            RpcResponse {
                id: req.id.clone(),
                op: req.op.clone(),
                kind,
                success: false,
                result: None,
                error: Some(RpcError::from(&e)),
            }
        }
    };

    let event = TraceEvent {
        trace_id: req.id.clone(),
        ts: time::now_epoch_z(),
        op: req.op.clone(),
        request: serde_json::to_value(&req).unwrap_or(Value::Null),
        response: serde_json::to_value(&response).unwrap_or(Value::Null),
    };
    if let Err(e) = trace::append_trace(&store.root, event) {
        tracing::warn!(error = %e, "failed to append rpc trace");
    }

    response
}

/// Parse a raw JSON request; malformed envelopes become a `VALIDATION` response.
pub fn handle_json(store: &Store, raw: &str) -> RpcResponse {
    match serde_json::from_str::<RpcRequest>(raw) {
        Ok(req) => handle(store, req),
        Err(e) => {
            let err = FleetgateError::ValidationError(format!("invalid request: {}", e));
            RpcResponse {
                id: default_request_id(),
                op: String::new(),
                kind: None,
                success: false,
                result: None,
                error: Some(RpcError::from(&err)),
            }
        }
    }
}
