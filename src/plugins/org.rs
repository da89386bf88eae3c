//! Organizations, memberships and invitations.
//!
//! Every organization keeps at least one `owner`; anything that would remove
//! or demote the last one fails with `Conflict`.

use crate::core::error::FleetgateError;
use crate::core::notify;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::audit::{self, NewAuditEntry};
use crate::plugins::rbac::{self, Credentials, Role};
use crate::plugins::session::{self, AuthContext};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static SLUG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,46}[a-z0-9])?$").expect("slug pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub owner_id: String,
    pub plan: String,
    pub require_mfa: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgMembership {
    pub id: String,
    pub org_id: String,
    pub user_id: String,
    /// Stored role string; see [`Role`] for the vocabulary.
    pub role: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Revoked,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Revoked => "revoked",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InvitationStatus::Pending),
            "accepted" => Some(InvitationStatus::Accepted),
            "revoked" => Some(InvitationStatus::Revoked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgInvitation {
    pub id: String,
    pub org_id: String,
    pub email: String,
    pub role: String,
    pub invited_by: String,
    pub status: InvitationStatus,
    pub created_at: i64,
}

fn row_to_org(row: &rusqlite::Row) -> Result<Organization, rusqlite::Error> {
    Ok(Organization {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        owner_id: row.get(3)?,
        plan: row.get(4)?,
        require_mfa: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_membership(row: &rusqlite::Row) -> Result<OrgMembership, rusqlite::Error> {
    Ok(OrgMembership {
        id: row.get(0)?,
        org_id: row.get(1)?,
        user_id: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_invitation(row: &rusqlite::Row) -> Result<OrgInvitation, rusqlite::Error> {
    let status: String = row.get(5)?;
    Ok(OrgInvitation {
        id: row.get(0)?,
        org_id: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        invited_by: row.get(4)?,
        status: InvitationStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(5, "status".to_string(), rusqlite::types::Type::Text)
        })?,
        created_at: row.get(6)?,
    })
}

pub fn find_org(conn: &Connection, org_id: &str) -> Result<Option<Organization>, FleetgateError> {
    let org = conn
        .query_row(
            "SELECT id, name, slug, owner_id, plan, require_mfa, created_at
             FROM organizations WHERE id = ?1",
            params![org_id],
            row_to_org,
        )
        .optional()?;
    Ok(org)
}

pub fn find_membership(
    conn: &Connection,
    org_id: &str,
    user_id: &str,
) -> Result<Option<OrgMembership>, FleetgateError> {
    let member = conn
        .query_row(
            "SELECT id, org_id, user_id, role, created_at
             FROM org_memberships WHERE org_id = ?1 AND user_id = ?2",
            params![org_id, user_id],
            row_to_membership,
        )
        .optional()?;
    Ok(member)
}

fn find_membership_by_id(
    conn: &Connection,
    org_id: &str,
    membership_id: &str,
) -> Result<OrgMembership, FleetgateError> {
    conn.query_row(
        "SELECT id, org_id, user_id, role, created_at
         FROM org_memberships WHERE id = ?1 AND org_id = ?2",
        params![membership_id, org_id],
        row_to_membership,
    )
    .optional()?
    .ok_or_else(|| FleetgateError::NotFound(format!("membership {}", membership_id)))
}

fn find_invitation(
    conn: &Connection,
    invitation_id: &str,
) -> Result<Option<OrgInvitation>, FleetgateError> {
    let invitation = conn
        .query_row(
            "SELECT id, org_id, email, role, invited_by, status, created_at
             FROM org_invitations WHERE id = ?1",
            params![invitation_id],
            row_to_invitation,
        )
        .optional()?;
    Ok(invitation)
}

fn count_owners(conn: &Connection, org_id: &str) -> Result<i64, FleetgateError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM org_memberships WHERE org_id = ?1 AND role = 'owner'",
        params![org_id],
        |row| row.get(0),
    )?)
}

fn insert_membership(
    conn: &Connection,
    org_id: &str,
    user_id: &str,
    role: Role,
) -> Result<OrgMembership, FleetgateError> {
    let member = OrgMembership {
        id: time::new_id(),
        org_id: org_id.to_string(),
        user_id: user_id.to_string(),
        role: role.as_str().to_string(),
        created_at: time::now_ms(),
    };
    conn.execute(
        "INSERT INTO org_memberships(id, org_id, user_id, role, created_at) VALUES(?1, ?2, ?3, ?4, ?5)",
        params![member.id, member.org_id, member.user_id, member.role, member.created_at],
    )?;
    Ok(member)
}

/// Granting or touching `owner` is reserved to owners.
fn require_owner_for(
    ctx: &AuthContext,
    store: &Store,
    touches_owner: bool,
) -> Result<(), FleetgateError> {
    if touches_owner && !store.roles.satisfies(ctx.role_str(), Role::Owner) {
        return Err(FleetgateError::Authorization(
            "requires owner access".to_string(),
        ));
    }
    Ok(())
}

/// Any authenticated user may create an organization and becomes its owner.
pub fn create_org(
    store: &Store,
    creds: &Credentials,
    name: &str,
    slug: &str,
) -> Result<Organization, FleetgateError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FleetgateError::ValidationError(
            "name must not be empty".to_string(),
        ));
    }
    if !SLUG_RE.is_match(slug) {
        return Err(FleetgateError::ValidationError(format!(
            "invalid slug '{}': use lowercase letters, digits and hyphens",
            slug
        )));
    }

    store
        .broker()
        .with_tx(&store.db_path(), "rpc", "organizations.create", |conn| {
            let unbound = Credentials {
                org_id: None,
                ..creds.clone()
            };
            let ctx = rbac::authorize(store, conn, &unbound, None)?;

            let taken: Option<String> = conn
                .query_row(
                    "SELECT id FROM organizations WHERE slug = ?1",
                    params![slug],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                return Err(FleetgateError::Conflict(format!(
                    "organization slug '{}' is taken",
                    slug
                )));
            }

            let org = Organization {
                id: time::new_id(),
                name: name.to_string(),
                slug: slug.to_string(),
                owner_id: ctx.user_id().to_string(),
                plan: "free".to_string(),
                require_mfa: false,
                created_at: time::now_ms(),
            };
            conn.execute(
                "INSERT INTO organizations(id, name, slug, owner_id, plan, require_mfa, created_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    org.id,
                    org.name,
                    org.slug,
                    org.owner_id,
                    org.plan,
                    org.require_mfa,
                    org.created_at
                ],
            )?;
            insert_membership(conn, &org.id, ctx.user_id(), Role::Owner)?;

            audit::append(
                conn,
                &NewAuditEntry::new("create_organization", "organization")
                    .org(&org.id)
                    .user(ctx.user_id())
                    .resource(&org.id)
                    .details(format!("Created organization {}", org.slug)),
            )?;
            Ok(org)
        })
}

pub fn get_org(store: &Store, creds: &Credentials) -> Result<Organization, FleetgateError> {
    store
        .broker()
        .with_conn(&store.db_path(), "rpc", "organizations.get", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Viewer)?;
            let org_id = ctx.org_id()?;
            find_org(conn, org_id)?
                .ok_or_else(|| FleetgateError::NotFound(format!("organization {}", org_id)))
        })
}

pub fn list_members(
    store: &Store,
    creds: &Credentials,
) -> Result<Vec<OrgMembership>, FleetgateError> {
    store
        .broker()
        .with_conn(&store.db_path(), "rpc", "organizations.members", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Viewer)?;
            let mut stmt = conn.prepare(
                "SELECT id, org_id, user_id, role, created_at
                 FROM org_memberships WHERE org_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![ctx.org_id()?], row_to_membership)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
}

pub fn add_member(
    store: &Store,
    creds: &Credentials,
    user_id: &str,
    role: Role,
) -> Result<OrgMembership, FleetgateError> {
    store
        .broker()
        .with_tx(&store.db_path(), "rpc", "organizations.add_member", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Admin)?;
            require_owner_for(&ctx, store, role == Role::Owner)?;
            let org_id = ctx.org_id()?;

            if session::find_user(conn, user_id)?.is_none() {
                return Err(FleetgateError::NotFound(format!("user {}", user_id)));
            }
            if find_membership(conn, org_id, user_id)?.is_some() {
                return Err(FleetgateError::Conflict(
                    "User is already a member of this organization".to_string(),
                ));
            }

            let member = insert_membership(conn, org_id, user_id, role)?;
            audit::append(
                conn,
                &NewAuditEntry::new("add_member", "org_membership")
                    .org(org_id)
                    .user(ctx.user_id())
                    .resource(&member.id)
                    .details(format!("Added {} as {}", user_id, role)),
            )?;
            Ok(member)
        })
}

pub fn update_member_role(
    store: &Store,
    creds: &Credentials,
    membership_id: &str,
    role: Role,
) -> Result<OrgMembership, FleetgateError> {
    store
        .broker()
        .with_tx(&store.db_path(), "rpc", "organizations.update_member_role", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Admin)?;
            let org_id = ctx.org_id()?;
            let mut member = find_membership_by_id(conn, org_id, membership_id)?;
            let was_owner = member.role == Role::Owner.as_str();
            require_owner_for(&ctx, store, was_owner || role == Role::Owner)?;

            if was_owner && role != Role::Owner && count_owners(conn, org_id)? <= 1 {
                return Err(FleetgateError::Conflict(
                    "Cannot demote the last owner of an organization".to_string(),
                ));
            }

            conn.execute(
                "UPDATE org_memberships SET role = ?1 WHERE id = ?2",
                params![role.as_str(), member.id],
            )?;
            let previous = std::mem::replace(&mut member.role, role.as_str().to_string());

            audit::append(
                conn,
                &NewAuditEntry::new("update_member_role", "org_membership")
                    .org(org_id)
                    .user(ctx.user_id())
                    .resource(&member.id)
                    .details(format!("Changed role from {} to {}", previous, role))
                    .metadata(serde_json::json!({ "member_user_id": member.user_id })),
            )?;
            Ok(member)
        })
}

/// Remove a membership and the user's team memberships in the organization.
pub fn remove_member(
    store: &Store,
    creds: &Credentials,
    membership_id: &str,
) -> Result<(), FleetgateError> {
    store
        .broker()
        .with_tx(&store.db_path(), "rpc", "organizations.remove_member", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Admin)?;
            let org_id = ctx.org_id()?;
            let member = find_membership_by_id(conn, org_id, membership_id)?;
            let is_owner = member.role == Role::Owner.as_str();
            require_owner_for(&ctx, store, is_owner)?;

            if is_owner && count_owners(conn, org_id)? <= 1 {
                return Err(FleetgateError::Conflict(
                    "Cannot remove the last owner of an organization".to_string(),
                ));
            }

            conn.execute(
                "DELETE FROM team_memberships WHERE org_id = ?1 AND user_id = ?2",
                params![org_id, member.user_id],
            )?;
            conn.execute("DELETE FROM org_memberships WHERE id = ?1", params![member.id])?;

            audit::append(
                conn,
                &NewAuditEntry::new("remove_member", "org_membership")
                    .org(org_id)
                    .user(ctx.user_id())
                    .resource(&member.id)
                    .details(format!("Removed {} ({})", member.user_id, member.role)),
            )?;
            Ok(())
        })
}

/// Toggle the organization-wide MFA gate. Owner only.
pub fn set_require_mfa(
    store: &Store,
    creds: &Credentials,
    require_mfa: bool,
) -> Result<Organization, FleetgateError> {
    let (org, recorded) =
        store
            .broker()
            .with_tx(&store.db_path(), "rpc", "organizations.set_require_mfa", |conn| {
                let ctx = rbac::authorize_in_org(store, conn, creds, Role::Owner)?;
                let org_id = ctx.org_id()?;
                conn.execute(
                    "UPDATE organizations SET require_mfa = ?1 WHERE id = ?2",
                    params![require_mfa, org_id],
                )?;
                let org = find_org(conn, org_id)?
                    .ok_or_else(|| FleetgateError::NotFound(format!("organization {}", org_id)))?;

                let entry = NewAuditEntry::new("update_mfa_policy", "organization")
                    .org(org_id)
                    .user(ctx.user_id())
                    .resource(org_id)
                    .details(if require_mfa {
                        "MFA required for all members"
                    } else {
                        "MFA requirement lifted"
                    });
                audit::append(conn, &entry)?;
                Ok((org, entry))
            })?;

    notify::dispatch(store.notifier.as_ref(), recorded.to_event());
    Ok(org)
}

pub fn invite(
    store: &Store,
    creds: &Credentials,
    email: &str,
    role: Role,
) -> Result<OrgInvitation, FleetgateError> {
    let email = email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(FleetgateError::ValidationError(format!(
            "invalid email '{}'",
            email
        )));
    }

    store
        .broker()
        .with_tx(&store.db_path(), "rpc", "organizations.invite", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Admin)?;
            require_owner_for(&ctx, store, role == Role::Owner)?;
            let org_id = ctx.org_id()?;

            if let Some(user) = session::find_user_by_email(conn, &email)? {
                if find_membership(conn, org_id, &user.id)?.is_some() {
                    return Err(FleetgateError::Conflict(format!(
                        "{} is already a member of this organization",
                        email
                    )));
                }
            }

            let pending: i64 = conn.query_row(
                "SELECT COUNT(*) FROM org_invitations WHERE org_id = ?1 AND email = ?2 AND status = 'pending'",
                params![org_id, email],
                |row| row.get(0),
            )?;
            if pending > 0 {
                return Err(FleetgateError::Conflict(format!(
                    "{} already has a pending invitation",
                    email
                )));
            }

            let invitation = OrgInvitation {
                id: time::new_id(),
                org_id: org_id.to_string(),
                email: email.clone(),
                role: role.as_str().to_string(),
                invited_by: ctx.user_id().to_string(),
                status: InvitationStatus::Pending,
                created_at: time::now_ms(),
            };
            conn.execute(
                "INSERT INTO org_invitations(id, org_id, email, role, invited_by, status, created_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    invitation.id,
                    invitation.org_id,
                    invitation.email,
                    invitation.role,
                    invitation.invited_by,
                    invitation.status.as_str(),
                    invitation.created_at
                ],
            )?;

            audit::append(
                conn,
                &NewAuditEntry::new("invite_member", "org_invitation")
                    .org(org_id)
                    .user(ctx.user_id())
                    .resource(&invitation.id)
                    .details(format!("Invited {} as {}", email, role)),
            )?;
            Ok(invitation)
        })
}

pub fn list_invitations(
    store: &Store,
    creds: &Credentials,
) -> Result<Vec<OrgInvitation>, FleetgateError> {
    store
        .broker()
        .with_conn(&store.db_path(), "rpc", "organizations.invitations", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Admin)?;
            let mut stmt = conn.prepare(
                "SELECT id, org_id, email, role, invited_by, status, created_at
                 FROM org_invitations WHERE org_id = ?1 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt.query_map(params![ctx.org_id()?], row_to_invitation)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
}

/// Accept a pending invitation addressed to the caller's email. The call is
/// org-agnostic: the caller is not a member yet.
pub fn accept_invitation(
    store: &Store,
    creds: &Credentials,
    invitation_id: &str,
) -> Result<OrgMembership, FleetgateError> {
    store
        .broker()
        .with_tx(&store.db_path(), "rpc", "organizations.accept_invitation", |conn| {
            let unbound = Credentials {
                org_id: None,
                ..creds.clone()
            };
            let ctx = rbac::authorize(store, conn, &unbound, None)?;

            let invitation = find_invitation(conn, invitation_id)?
                .ok_or_else(|| FleetgateError::NotFound(format!("invitation {}", invitation_id)))?;
            if invitation.email != ctx.user.email {
                return Err(FleetgateError::NotFound(format!("invitation {}", invitation_id)));
            }
            if invitation.status != InvitationStatus::Pending {
                return Err(FleetgateError::Conflict(format!(
                    "invitation is {}",
                    invitation.status.as_str()
                )));
            }
            if find_membership(conn, &invitation.org_id, ctx.user_id())?.is_some() {
                return Err(FleetgateError::Conflict(
                    "User is already a member of this organization".to_string(),
                ));
            }

            let role: Role = invitation.role.parse()?;
            let member = insert_membership(conn, &invitation.org_id, ctx.user_id(), role)?;
            conn.execute(
                "UPDATE org_invitations SET status = 'accepted' WHERE id = ?1",
                params![invitation.id],
            )?;

            audit::append(
                conn,
                &NewAuditEntry::new("accept_invitation", "org_invitation")
                    .org(&invitation.org_id)
                    .user(ctx.user_id())
                    .resource(&invitation.id)
                    .details(format!("Joined as {}", role)),
            )?;
            Ok(member)
        })
}

pub fn revoke_invitation(
    store: &Store,
    creds: &Credentials,
    invitation_id: &str,
) -> Result<OrgInvitation, FleetgateError> {
    store
        .broker()
        .with_tx(&store.db_path(), "rpc", "organizations.revoke_invitation", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Admin)?;
            let org_id = ctx.org_id()?;

            let mut invitation = find_invitation(conn, invitation_id)?
                .filter(|i| i.org_id == org_id)
                .ok_or_else(|| FleetgateError::NotFound(format!("invitation {}", invitation_id)))?;
            if invitation.status != InvitationStatus::Pending {
                return Err(FleetgateError::Conflict(format!(
                    "invitation is {}",
                    invitation.status.as_str()
                )));
            }

            conn.execute(
                "UPDATE org_invitations SET status = 'revoked' WHERE id = ?1",
                params![invitation.id],
            )?;
            invitation.status = InvitationStatus::Revoked;

            audit::append(
                conn,
                &NewAuditEntry::new("revoke_invitation", "org_invitation")
                    .org(org_id)
                    .user(ctx.user_id())
                    .resource(&invitation.id)
                    .details(format!("Revoked invitation for {}", invitation.email)),
            )?;
            Ok(invitation)
        })
}
