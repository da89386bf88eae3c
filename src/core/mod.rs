//! Core modules for Fleetgate's control plane.
//!
//! Storage, the transaction broker, configuration, errors, logging, the
//! notification seam and the RPC surface live here. Domain behavior lives
//! in [`crate::plugins`].

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod migration;
pub mod notify;
pub mod rpc;
pub mod schemas;
pub mod store;
pub mod time;
pub mod trace;
