//! Centralized database schema definitions.
//!
//! Fleetgate keeps all control-plane state in a single SQLite database
//! (`console.db`) so that a session check, a permission check, a resource
//! mutation and its audit entry can share one transaction.

pub const CONSOLE_DB_NAME: &str = "console.db";
pub const CONSOLE_SCHEMA_VERSION: u32 = 2;

pub const SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

// --- Identity ---

pub const SCHEMA_USERS: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        mfa_enabled INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
";

pub const SCHEMA_SESSIONS: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        token_hash TEXT NOT NULL UNIQUE,
        user_id TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        mfa_verified INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
";
pub const SCHEMA_SESSIONS_INDEX_USER: &str =
    "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)";

// --- Tenancy ---

pub const SCHEMA_ORGANIZATIONS: &str = "
    CREATE TABLE IF NOT EXISTS organizations (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        slug TEXT NOT NULL UNIQUE,
        owner_id TEXT NOT NULL,
        plan TEXT NOT NULL DEFAULT 'free',
        require_mfa INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
";

pub const SCHEMA_ORG_MEMBERSHIPS: &str = "
    CREATE TABLE IF NOT EXISTS org_memberships (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        role TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(org_id, user_id),
        FOREIGN KEY(org_id) REFERENCES organizations(id) ON DELETE CASCADE
    )
";

pub const SCHEMA_ORG_INVITATIONS: &str = "
    CREATE TABLE IF NOT EXISTS org_invitations (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        email TEXT NOT NULL,
        role TEXT NOT NULL,
        invited_by TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at INTEGER NOT NULL,
        FOREIGN KEY(org_id) REFERENCES organizations(id) ON DELETE CASCADE
    )
";
pub const SCHEMA_ORG_INVITATIONS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_org_invitations_email
     ON org_invitations(org_id, email, status)";

pub const SCHEMA_TEAMS: &str = "
    CREATE TABLE IF NOT EXISTS teams (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        name TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY(org_id) REFERENCES organizations(id) ON DELETE CASCADE
    )
";

pub const SCHEMA_TEAM_MEMBERSHIPS: &str = "
    CREATE TABLE IF NOT EXISTS team_memberships (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        team_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(team_id, user_id),
        FOREIGN KEY(team_id) REFERENCES teams(id) ON DELETE CASCADE
    )
";
pub const SCHEMA_TEAM_MEMBERSHIPS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_team_memberships_user ON team_memberships(org_id, user_id)";

// --- Fleet ---

pub const SCHEMA_AGENTS: &str = "
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        team_id TEXT,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        FOREIGN KEY(org_id) REFERENCES organizations(id) ON DELETE CASCADE
    )
";
pub const SCHEMA_AGENTS_INDEX_ORG: &str =
    "CREATE INDEX IF NOT EXISTS idx_agents_org ON agents(org_id, team_id)";

pub const SCHEMA_INSTANCES: &str = "
    CREATE TABLE IF NOT EXISTS instances (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        team_id TEXT,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        FOREIGN KEY(org_id) REFERENCES organizations(id) ON DELETE CASCADE
    )
";
pub const SCHEMA_INSTANCES_INDEX_ORG: &str =
    "CREATE INDEX IF NOT EXISTS idx_instances_org ON instances(org_id, team_id)";

// --- Approvals ---

pub const SCHEMA_APPROVALS: &str = "
    CREATE TABLE IF NOT EXISTS approvals (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        agent_id TEXT NOT NULL,
        description TEXT NOT NULL,
        action_detail TEXT,
        risk_level TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        decided_by TEXT,
        decided_at INTEGER,
        created_at INTEGER NOT NULL
    )
";
pub const SCHEMA_APPROVALS_INDEX_ORG: &str =
    "CREATE INDEX IF NOT EXISTS idx_approvals_org ON approvals(org_id, created_at)";
pub const SCHEMA_APPROVALS_INDEX_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_approvals_status ON approvals(org_id, status)";
pub const SCHEMA_APPROVALS_INDEX_USER: &str =
    "CREATE INDEX IF NOT EXISTS idx_approvals_user ON approvals(org_id, user_id)";

// --- Audit trail ---

pub const SCHEMA_AUDIT_LOG: &str = "
    CREATE TABLE IF NOT EXISTS audit_log (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        org_id TEXT,
        user_id TEXT,
        action TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        resource_id TEXT,
        details TEXT,
        metadata TEXT,
        created_at INTEGER NOT NULL
    )
";
pub const SCHEMA_AUDIT_LOG_INDEX_ORG: &str =
    "CREATE INDEX IF NOT EXISTS idx_audit_log_org ON audit_log(org_id, seq)";
pub const SCHEMA_AUDIT_LOG_NO_UPDATE: &str = "
    CREATE TRIGGER IF NOT EXISTS audit_log_no_update
    BEFORE UPDATE ON audit_log
    BEGIN
        SELECT RAISE(ABORT, 'audit_log is append-only');
    END
";
pub const SCHEMA_AUDIT_LOG_NO_DELETE: &str = "
    CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
    BEFORE DELETE ON audit_log
    BEGIN
        SELECT RAISE(ABORT, 'audit_log is append-only');
    END
";

/// Every statement needed to bring an empty database to the current schema,
/// in dependency order.
pub const CONSOLE_DB_SCHEMA: &[&str] = &[
    SCHEMA_META,
    SCHEMA_USERS,
    SCHEMA_SESSIONS,
    SCHEMA_SESSIONS_INDEX_USER,
    SCHEMA_ORGANIZATIONS,
    SCHEMA_ORG_MEMBERSHIPS,
    SCHEMA_ORG_INVITATIONS,
    SCHEMA_ORG_INVITATIONS_INDEX,
    SCHEMA_TEAMS,
    SCHEMA_TEAM_MEMBERSHIPS,
    SCHEMA_TEAM_MEMBERSHIPS_INDEX,
    SCHEMA_AGENTS,
    SCHEMA_AGENTS_INDEX_ORG,
    SCHEMA_INSTANCES,
    SCHEMA_INSTANCES_INDEX_ORG,
    SCHEMA_APPROVALS,
    SCHEMA_APPROVALS_INDEX_ORG,
    SCHEMA_APPROVALS_INDEX_STATUS,
    SCHEMA_APPROVALS_INDEX_USER,
    SCHEMA_AUDIT_LOG,
    SCHEMA_AUDIT_LOG_INDEX_ORG,
    SCHEMA_AUDIT_LOG_NO_UPDATE,
    SCHEMA_AUDIT_LOG_NO_DELETE,
];
