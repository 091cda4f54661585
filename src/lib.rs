#![forbid(unsafe_code)]

//! Session-scoped overlay mounts for sandboxed coding agents.
//!
//! Each agent session gets a copy-on-write overlay of its project directory.
//! Tool arguments are translated into the overlay before execution and
//! results are translated back afterwards, while every tool call is recorded
//! in the session's store.

pub mod broker;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod ipc;
pub mod models;
pub mod overlay;
pub mod paths;
pub mod persistence;
pub mod registry;
pub mod tracking;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
