//! Control-plane subsystems.
//!
//! Leaves first: `audit`, `session`, `rbac`, `access`, then the state
//! machines in `approval` and `quarantine`. `org`, `team` and `fleet` hold
//! the records those read.

pub mod access;
pub mod approval;
pub mod audit;
pub mod fleet;
pub mod org;
pub mod quarantine;
pub mod rbac;
pub mod session;
pub mod team;
