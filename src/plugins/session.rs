//! Session resolver and identity bootstrap.
//!
//! SSO/WebAuthn verification happens elsewhere; what reaches this module is
//! the fact that a user authenticated, in the form of an issued session.
//! Tokens are stored only as SHA-256 digests.

use crate::core::error::FleetgateError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::org::{self, OrgMembership};
use crate::plugins::rbac::Role;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub mfa_enabled: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(skip_serializing, default)]
    pub token_hash: String,
    pub user_id: String,
    pub expires_at: i64,
    pub mfa_verified: bool,
    pub created_at: i64,
}

impl Session {
    pub fn is_live(&self, now: i64) -> bool {
        now < self.expires_at
    }
}

/// A freshly issued session. The plaintext token exists only here.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub user: User,
    pub session: Session,
    pub member: Option<OrgMembership>,
    pub org_id: Option<String>,
}

impl AuthContext {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// The bound organization, or a validation error for org-agnostic calls.
    pub fn org_id(&self) -> Result<&str, FleetgateError> {
        self.org_id
            .as_deref()
            .ok_or_else(|| FleetgateError::ValidationError("orgId is required".to_string()))
    }

    /// Parsed role of the bound membership, if it is a canonical role.
    pub fn role(&self) -> Option<Role> {
        self.member.as_ref().and_then(|m| m.role.parse().ok())
    }

    pub fn role_str(&self) -> &str {
        self.member.as_ref().map(|m| m.role.as_str()).unwrap_or("")
    }
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_token() -> String {
    format!("fg_{}{}", Ulid::new(), Ulid::new()).to_lowercase()
}

fn row_to_user(row: &rusqlite::Row) -> Result<User, rusqlite::Error> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        mfa_enabled: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_session(row: &rusqlite::Row) -> Result<Session, rusqlite::Error> {
    Ok(Session {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        user_id: row.get(2)?,
        expires_at: row.get(3)?,
        mfa_verified: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn find_user(conn: &Connection, user_id: &str) -> Result<Option<User>, FleetgateError> {
    let user = conn
        .query_row(
            "SELECT id, email, name, mfa_enabled, created_at FROM users WHERE id = ?1",
            params![user_id],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>, FleetgateError> {
    let user = conn
        .query_row(
            "SELECT id, email, name, mfa_enabled, created_at FROM users WHERE email = ?1",
            params![email.to_lowercase()],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

fn find_session_by_token(
    conn: &Connection,
    token: &str,
) -> Result<Option<Session>, FleetgateError> {
    let session = conn
        .query_row(
            "SELECT id, token_hash, user_id, expires_at, mfa_verified, created_at
             FROM sessions WHERE token_hash = ?1",
            params![hash_token(token)],
            row_to_session,
        )
        .optional()?;
    Ok(session)
}

/// Resolve a bearer token (and optionally an organization) into a caller
/// context. Read-only.
pub fn resolve(
    conn: &Connection,
    token: Option<&str>,
    org_id: Option<&str>,
) -> Result<AuthContext, FleetgateError> {
    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => return Err(FleetgateError::Authentication("Not authenticated".to_string())),
    };

    let session = match find_session_by_token(conn, token)? {
        Some(s) if s.is_live(time::now_ms()) => s,
        _ => {
            return Err(FleetgateError::Authentication(
                "Session invalid or expired".to_string(),
            ));
        }
    };

    let user = find_user(conn, &session.user_id)?
        .ok_or_else(|| FleetgateError::Authentication("User not found".to_string()))?;

    let Some(org_id) = org_id else {
        return Ok(AuthContext {
            user,
            session,
            member: None,
            org_id: None,
        });
    };

    let member = org::find_membership(conn, org_id, &user.id)?.ok_or_else(|| {
        FleetgateError::Authorization("Not a member of this organization".to_string())
    })?;

    let organization = org::find_org(conn, org_id)?
        .ok_or_else(|| FleetgateError::NotFound(format!("organization {}", org_id)))?;

    if organization.require_mfa && !session.mfa_verified {
        return Err(FleetgateError::MfaRequired);
    }

    Ok(AuthContext {
        user,
        session,
        member: Some(member),
        org_id: Some(org_id.to_string()),
    })
}

/// Read-only resolution through the broker; backs `session.whoami`.
pub fn whoami(
    store: &Store,
    token: Option<&str>,
    org_id: Option<&str>,
) -> Result<AuthContext, FleetgateError> {
    store
        .broker()
        .with_conn(&store.db_path(), "rpc", "session.whoami", |conn| {
            resolve(conn, token, org_id)
        })
}

pub fn register_user(store: &Store, email: &str, name: &str) -> Result<User, FleetgateError> {
    let email = email.trim().to_lowercase();
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(FleetgateError::ValidationError(format!(
            "invalid email '{}'",
            email
        )));
    }
    if name.trim().is_empty() {
        return Err(FleetgateError::ValidationError(
            "name must not be empty".to_string(),
        ));
    }

    let user = User {
        id: time::new_id(),
        email,
        name: name.trim().to_string(),
        mfa_enabled: false,
        created_at: time::now_ms(),
    };

    store
        .broker()
        .with_tx(&store.db_path(), "identity", "users.register", |conn| {
            if find_user_by_email(conn, &user.email)?.is_some() {
                return Err(FleetgateError::Conflict(format!(
                    "user {} already exists",
                    user.email
                )));
            }
            conn.execute(
                "INSERT INTO users(id, email, name, mfa_enabled, created_at) VALUES(?1, ?2, ?3, ?4, ?5)",
                params![user.id, user.email, user.name, user.mfa_enabled, user.created_at],
            )?;
            Ok(())
        })?;

    Ok(user)
}

/// Record a successful login for `user_id`. Called by the identity
/// collaborator after SSO, WebAuthn or password verification.
pub fn issue_session(
    store: &Store,
    user_id: &str,
    mfa_verified: bool,
) -> Result<IssuedSession, FleetgateError> {
    let token = generate_token();
    let now = time::now_ms();
    let session = Session {
        id: time::new_id(),
        token_hash: hash_token(&token),
        user_id: user_id.to_string(),
        expires_at: now.saturating_add(store.config.session_ttl_secs.saturating_mul(1000)),
        mfa_verified,
        created_at: now,
    };

    store
        .broker()
        .with_tx(&store.db_path(), "identity", "sessions.issue", |conn| {
            if find_user(conn, user_id)?.is_none() {
                return Err(FleetgateError::NotFound(format!("user {}", user_id)));
            }
            conn.execute(
                "INSERT INTO sessions(id, token_hash, user_id, expires_at, mfa_verified, created_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.id,
                    session.token_hash,
                    session.user_id,
                    session.expires_at,
                    session.mfa_verified,
                    session.created_at
                ],
            )?;
            Ok(())
        })?;

    tracing::info!(user_id, session_id = %session.id, "session issued");
    Ok(IssuedSession { token, session })
}

/// Flip `mfa_verified` after the identity collaborator completed a second
/// factor for this session.
pub fn mark_mfa_verified(store: &Store, token: &str) -> Result<Session, FleetgateError> {
    store
        .broker()
        .with_tx(&store.db_path(), "identity", "sessions.mfa_verified", |conn| {
            let mut session = find_session_by_token(conn, token)?
                .filter(|s| s.is_live(time::now_ms()))
                .ok_or_else(|| {
                    FleetgateError::Authentication("Session invalid or expired".to_string())
                })?;
            conn.execute(
                "UPDATE sessions SET mfa_verified = 1 WHERE id = ?1",
                params![session.id],
            )?;
            conn.execute(
                "UPDATE users SET mfa_enabled = 1 WHERE id = ?1",
                params![session.user_id],
            )?;
            session.mfa_verified = true;
            Ok(session)
        })
}

/// Logout: delete the caller's own session.
pub fn revoke_session(store: &Store, token: Option<&str>) -> Result<(), FleetgateError> {
    store
        .broker()
        .with_tx(&store.db_path(), "rpc", "session.revoke", |conn| {
            let ctx = resolve(conn, token, None)?;
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![ctx.session.id])?;
            Ok(())
        })
}

/// Delete every session past its expiry. Expired sessions are already
/// unusable; this only reclaims rows.
pub fn prune_expired_sessions(store: &Store) -> Result<usize, FleetgateError> {
    let now = time::now_ms();
    store
        .broker()
        .with_tx(&store.db_path(), "fleetgate", "sessions.prune", |conn| {
            Ok(conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])?)
        })
}
