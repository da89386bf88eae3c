//! Fleetgate: the authorization and operational-safety control plane for an
//! AI agent fleet.
//!
//! # What lives here
//!
//! - **Sessions**: bearer tokens resolved to a user and, optionally, an
//!   organization, with the organization's MFA gate enforced.
//! - **Roles**: `viewer < operator < admin < owner`, one per (user, org).
//! - **Team scoping**: non-admins only see untagged records and records of
//!   their own teams.
//! - **Approvals**: human-in-the-loop decisions on risky agent actions.
//! - **Quarantine and kill switch**: per-resource quarantine plus bulk
//!   pause/resume of agents and instances.
//! - **Audit trail**: every privileged transition is appended in the same
//!   transaction that performs it.
//!
//! # The Thin Waist
//!
//! All state lives in one SQLite database (`console.db`) and every access
//! goes through `DbBroker`:
//! - Serialization (in-process lock plus an immediate transaction)
//! - Operational log (`broker.events.jsonl`)
//! - Rollback of the whole call on any error
//!
//! # Examples
//!
//! ```bash
//! fleetgate init
//! fleetgate user register --email ops@example.com --name "Ops"
//! fleetgate session issue --user-id <id>
//! echo '{"op":"agents.pause_all","token":"…","org_id":"…"}' | fleetgate rpc
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: storage, broker, config, errors, logging, notifier, RPC
//! - [`plugins`]: session, rbac, access, approval, quarantine, audit, org,
//!   team and fleet

pub mod core;
pub mod plugins;

use crate::core::{
    broker,
    config::ConsoleConfig,
    error::FleetgateError,
    logging, migration, rpc,
    store::Store,
    time, trace,
};
use crate::plugins::{
    audit::{self, AuditFilter},
    rbac::Credentials,
    session,
};

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Read;
use std::path::PathBuf;

pub const DEFAULT_STORE_DIR: &str = ".fleetgate";

#[derive(Parser, Debug)]
#[clap(
    name = "fleetgate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Authorization and operational-safety control plane for AI agent fleets"
)]
struct Cli {
    /// Store root directory.
    #[clap(long, global = true, default_value = DEFAULT_STORE_DIR)]
    root: PathBuf,
    /// Emit diagnostics as JSON lines on stderr.
    #[clap(long, global = true)]
    log_json: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create (or upgrade) the store.
    Init,
    /// Handle one JSON request from `--request` or stdin.
    Rpc {
        #[clap(long)]
        request: Option<String>,
    },
    /// List every RPC operation and its kind.
    Ops,
    /// Identity bootstrap standing in for the external identity provider.
    User(UserCli),
    Session(SessionCli),
    Audit(AuditCli),
    Broker(BrokerCli),
    /// Show the last RPC traces (redacted).
    Traces {
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
    Version,
}

#[derive(clap::Args, Debug)]
struct UserCli {
    #[clap(subcommand)]
    command: UserCommand,
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    Register {
        #[clap(long)]
        email: String,
        #[clap(long)]
        name: String,
    },
}

#[derive(clap::Args, Debug)]
struct SessionCli {
    #[clap(subcommand)]
    command: SessionCommand,
}

#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Record a successful login and print the bearer token.
    Issue {
        #[clap(long)]
        user_id: String,
        /// The login already completed a second factor.
        #[clap(long)]
        mfa_verified: bool,
    },
    /// Mark a session as having completed MFA.
    VerifyMfa {
        #[clap(long)]
        token: String,
    },
    /// Delete expired sessions.
    Prune,
}

#[derive(clap::Args, Debug)]
struct AuditCli {
    #[clap(subcommand)]
    command: AuditCommand,
}

#[derive(Subcommand, Debug)]
enum AuditCommand {
    List {
        #[clap(long)]
        token: String,
        #[clap(long)]
        org_id: String,
        #[clap(long)]
        action: Option<String>,
        #[clap(long)]
        resource_type: Option<String>,
        #[clap(long)]
        cursor: Option<String>,
        #[clap(long)]
        limit: Option<u32>,
    },
    /// Write the organization's trail as JSON Lines.
    Export {
        #[clap(long)]
        token: String,
        #[clap(long)]
        org_id: String,
        #[clap(long)]
        out: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct BrokerCli {
    #[clap(subcommand)]
    command: BrokerCommand,
}

#[derive(Subcommand, Debug)]
enum BrokerCommand {
    /// Show the last brokered calls.
    Events {
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
}

fn print_json(value: &serde_json::Value) -> Result<(), FleetgateError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ok_envelope(cmd: &str, extra: serde_json::Value) -> Result<(), FleetgateError> {
    print_json(&time::command_envelope(cmd, "ok", extra))
}

pub fn run() -> Result<(), FleetgateError> {
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        println!("v{}", migration::FLEETGATE_VERSION);
        return Ok(());
    }

    // The config decides the default log level, so read it before opening.
    let log_level = ConsoleConfig::load(&cli.root)
        .map(|c| c.log_level)
        .unwrap_or_else(|_| ConsoleConfig::default().log_level);
    logging::init_tracing(&log_level, cli.log_json);

    let store = Store::open(&cli.root)?;

    match cli.command {
        Command::Version => {}
        Command::Init => {
            println!(
                "{} store ready at {}",
                "▸".bright_green(),
                store.root.display().to_string().bright_white()
            );
            println!(
                "  {} {}",
                "●".bright_green(),
                store.db_path().display().to_string().bright_white()
            );
        }
        Command::Rpc { request } => {
            let raw = match request {
                Some(r) => r,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let response = rpc::handle_json(&store, raw.trim());
            print_json(&serde_json::to_value(&response)?)?;
        }
        Command::Ops => {
            for (op, kind) in rpc::operations() {
                let kind = match kind {
                    rpc::OpKind::Query => "query".cyan(),
                    rpc::OpKind::Mutation => "mutation".yellow(),
                };
                println!("{:<36} {}", op, kind);
            }
        }
        Command::User(user_cli) => match user_cli.command {
            UserCommand::Register { email, name } => {
                let user = session::register_user(&store, &email, &name)?;
                ok_envelope("user.register", serde_json::json!({ "user": user }))?;
            }
        },
        Command::Session(session_cli) => match session_cli.command {
            SessionCommand::Issue {
                user_id,
                mfa_verified,
            } => {
                let issued = session::issue_session(&store, &user_id, mfa_verified)?;
                ok_envelope("session.issue", serde_json::to_value(&issued)?)?;
            }
            SessionCommand::VerifyMfa { token } => {
                let verified = session::mark_mfa_verified(&store, &token)?;
                ok_envelope("session.verify_mfa", serde_json::json!({ "session": verified }))?;
            }
            SessionCommand::Prune => {
                let pruned = session::prune_expired_sessions(&store)?;
                ok_envelope("session.prune", serde_json::json!({ "pruned": pruned }))?;
            }
        },
        Command::Audit(audit_cli) => match audit_cli.command {
            AuditCommand::List {
                token,
                org_id,
                action,
                resource_type,
                cursor,
                limit,
            } => {
                let filter = AuditFilter {
                    action,
                    resource_type,
                    user_id: None,
                };
                let page = audit::list(
                    &store,
                    &Credentials::in_org(&token, &org_id),
                    &filter,
                    cursor.as_deref(),
                    limit,
                )?;
                for entry in &page.entries {
                    println!(
                        "{:>6}  {}  {:<24} {:<14} {}",
                        entry.seq,
                        entry.created_at,
                        entry.action.bright_white(),
                        entry.resource_type,
                        entry.details.as_deref().unwrap_or("")
                    );
                }
                if let Some(next) = page.next_cursor {
                    println!("{} --cursor {}", "more:".dimmed(), next);
                }
            }
            AuditCommand::Export { token, org_id, out } => {
                let count = audit::export(&store, &Credentials::in_org(&token, &org_id), &out)?;
                ok_envelope(
                    "audit.export",
                    serde_json::json!({ "exported": count, "path": out.display().to_string() }),
                )?;
            }
        },
        Command::Broker(broker_cli) => match broker_cli.command {
            BrokerCommand::Events { limit } => {
                let events = broker::read_events(&store.root, limit)?;
                if events.is_empty() {
                    println!("No broker events found.");
                }
                for ev in events {
                    let status = if ev.status == "success" {
                        ev.status.green()
                    } else {
                        ev.status.red()
                    };
                    println!("{}  {:<5} {:<36} {}", ev.ts, ev.mode, ev.op, status);
                }
            }
        },
        Command::Traces { limit } => {
            for line in trace::last_traces(&store.root, limit)? {
                println!("{}", line);
            }
        }
    }

    Ok(())
}
