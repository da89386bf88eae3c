//! Append-only audit trail.
//!
//! `append` runs on the caller's connection so the entry commits or rolls
//! back together with the mutation it records. Storage triggers reject any
//! UPDATE or DELETE on `audit_log`.

use crate::core::error::FleetgateError;
use crate::core::notify::{self, SecurityEvent};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::rbac::{self, Credentials, Role};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: i64,
    pub id: String,
    pub org_id: Option<String>,
    pub user_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Option<String>,
    pub metadata: Option<JsonValue>,
    pub created_at: i64,
}

/// An entry about to be appended. `seq`, `id` and `created_at` are stamped
/// on insert.
#[derive(Debug, Clone, Default)]
pub struct NewAuditEntry {
    pub org_id: Option<String>,
    pub user_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Option<String>,
    pub metadata: Option<JsonValue>,
}

impl NewAuditEntry {
    pub fn new(action: &str, resource_type: &str) -> Self {
        Self {
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            ..Default::default()
        }
    }

    pub fn org(mut self, org_id: &str) -> Self {
        self.org_id = Some(org_id.to_string());
        self
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn resource(mut self, resource_id: &str) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Security event mirroring this entry, for post-commit notification.
    pub fn to_event(&self) -> SecurityEvent {
        let mut event = SecurityEvent::new(&self.action, &self.resource_type);
        event.org_id = self.org_id.clone();
        event.actor_id = self.user_id.clone();
        event.resource_id = self.resource_id.clone();
        event.details = self.details.clone();
        event
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditFilter {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    /// Pass back as `cursor` to fetch the next (older) page.
    pub next_cursor: Option<String>,
}

fn encode_cursor(seq: i64) -> String {
    format!("a{:x}", seq)
}

fn decode_cursor(cursor: &str) -> Result<i64, FleetgateError> {
    cursor
        .strip_prefix('a')
        .and_then(|hex| i64::from_str_radix(hex, 16).ok())
        .filter(|seq| *seq > 0)
        .ok_or_else(|| FleetgateError::ValidationError(format!("invalid cursor '{}'", cursor)))
}

/// Insert one entry. Only `action` and `resource_type` are required.
pub fn append(conn: &Connection, entry: &NewAuditEntry) -> Result<AuditEntry, FleetgateError> {
    if entry.action.trim().is_empty() {
        return Err(FleetgateError::ValidationError(
            "audit action is required".to_string(),
        ));
    }
    if entry.resource_type.trim().is_empty() {
        return Err(FleetgateError::ValidationError(
            "audit resource_type is required".to_string(),
        ));
    }

    let id = time::new_id();
    let created_at = time::now_ms();
    let metadata = entry
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO audit_log(id, org_id, user_id, action, resource_type, resource_id, details, metadata, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            entry.org_id,
            entry.user_id,
            entry.action,
            entry.resource_type,
            entry.resource_id,
            entry.details,
            metadata,
            created_at
        ],
    )?;

    Ok(AuditEntry {
        seq: conn.last_insert_rowid(),
        id,
        org_id: entry.org_id.clone(),
        user_id: entry.user_id.clone(),
        action: entry.action.clone(),
        resource_type: entry.resource_type.clone(),
        resource_id: entry.resource_id.clone(),
        details: entry.details.clone(),
        metadata: entry.metadata.clone(),
        created_at,
    })
}

fn row_to_entry(row: &rusqlite::Row) -> Result<AuditEntry, rusqlite::Error> {
    let metadata: Option<String> = row.get(8)?;
    Ok(AuditEntry {
        seq: row.get(0)?,
        id: row.get(1)?,
        org_id: row.get(2)?,
        user_id: row.get(3)?,
        action: row.get(4)?,
        resource_type: row.get(5)?,
        resource_id: row.get(6)?,
        details: row.get(7)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: row.get(9)?,
    })
}

/// Newest-first page of one organization's trail.
pub fn list_entries(
    conn: &Connection,
    org_id: &str,
    filter: &AuditFilter,
    before_seq: Option<i64>,
    limit: u32,
) -> Result<Vec<AuditEntry>, FleetgateError> {
    let mut sql = String::from(
        "SELECT seq, id, org_id, user_id, action, resource_type, resource_id, details, metadata, created_at
         FROM audit_log WHERE org_id = ?",
    );
    let mut args: Vec<SqlValue> = vec![SqlValue::Text(org_id.to_string())];

    if let Some(action) = &filter.action {
        sql.push_str(" AND action = ?");
        args.push(SqlValue::Text(action.clone()));
    }
    if let Some(resource_type) = &filter.resource_type {
        sql.push_str(" AND resource_type = ?");
        args.push(SqlValue::Text(resource_type.clone()));
    }
    if let Some(user_id) = &filter.user_id {
        sql.push_str(" AND user_id = ?");
        args.push(SqlValue::Text(user_id.clone()));
    }
    if let Some(seq) = before_seq {
        sql.push_str(" AND seq < ?");
        args.push(SqlValue::Integer(seq));
    }
    sql.push_str(" ORDER BY seq DESC LIMIT ?");
    args.push(SqlValue::Integer(i64::from(limit)));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), row_to_entry)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Paginated read of the caller's organization trail. Requires admin.
pub fn list(
    store: &Store,
    creds: &Credentials,
    filter: &AuditFilter,
    cursor: Option<&str>,
    limit: Option<u32>,
) -> Result<AuditPage, FleetgateError> {
    let before_seq = cursor.map(decode_cursor).transpose()?;
    let limit = store.config.page_limit(limit);

    store
        .broker()
        .with_conn(&store.db_path(), "rpc", "audit.list", |conn| {
            let ctx = rbac::authorize_in_org(store, conn, creds, Role::Admin)?;
            let org_id = ctx.org_id()?;

            // One extra row tells us whether another page exists.
            let mut entries =
                list_entries(conn, org_id, filter, before_seq, limit.saturating_add(1))?;
            let next_cursor = if entries.len() > limit as usize {
                entries.truncate(limit as usize);
                entries.last().map(|e| encode_cursor(e.seq))
            } else {
                None
            };
            Ok(AuditPage {
                entries,
                next_cursor,
            })
        })
}

pub const EXPORTS_DIR: &str = "exports";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredExport {
    pub exported: usize,
    pub path: PathBuf,
}

/// Write the organization's full trail, oldest first, as JSON Lines to
/// `dest`. The export itself is recorded as `export_audit_log`.
///
/// `dest` is trusted: only the local CLI passes a caller-chosen path.
pub fn export(store: &Store, creds: &Credentials, dest: &Path) -> Result<usize, FleetgateError> {
    export_with(store, creds, |_| Ok(dest.to_path_buf())).map(|(count, _)| count)
}

/// Export into `<root>/exports/<org_id>-<ulid>.jsonl`. The file name is
/// never taken from the caller.
pub fn export_to_store(
    store: &Store,
    creds: &Credentials,
) -> Result<StoredExport, FleetgateError> {
    let dir = store.root.join(EXPORTS_DIR);
    let (exported, path) = export_with(store, creds, |org_id| {
        fs::create_dir_all(&dir)?;
        Ok(dir.join(format!("{}-{}.jsonl", org_id, time::new_id())))
    })?;
    Ok(StoredExport { exported, path })
}

fn export_with<F>(
    store: &Store,
    creds: &Credentials,
    destination: F,
) -> Result<(usize, PathBuf), FleetgateError>
where
    F: FnOnce(&str) -> Result<PathBuf, FleetgateError>,
{
    let (count, dest, recorded) =
        store
            .broker()
            .with_tx(&store.db_path(), "rpc", "audit.export", |conn| {
                let ctx = rbac::authorize_in_org(store, conn, creds, Role::Admin)?;
                let org_id = ctx.org_id()?.to_string();
                let dest = destination(&org_id)?;

                let mut stmt = conn.prepare(
                    "SELECT seq, id, org_id, user_id, action, resource_type, resource_id, details, metadata, created_at
                     FROM audit_log WHERE org_id = ?1 ORDER BY seq ASC",
                )?;
                let rows = stmt.query_map(params![org_id], row_to_entry)?;

                let mut writer = BufWriter::new(File::create(&dest)?);
                let mut count = 0usize;
                for r in rows {
                    writeln!(writer, "{}", serde_json::to_string(&r?)?)?;
                    count += 1;
                }
                writer.flush()?;

                let entry = NewAuditEntry::new("export_audit_log", "audit_log")
                    .org(&org_id)
                    .user(ctx.user_id())
                    .details(format!("Exported {} entries", count))
                    .metadata(serde_json::json!({ "destination": dest.display().to_string() }));
                append(conn, &entry)?;
                Ok((count, dest, entry))
            })?;

    notify::dispatch(store.notifier.as_ref(), recorded.to_event());
    Ok((count, dest))
}
