//! Local IPC layer for `overlay-broker-ctl` and host hooks.
//!
//! Provides a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! server that accepts JSON-line events.

pub mod server;
