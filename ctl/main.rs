#![forbid(unsafe_code)]

//! `overlay-broker-ctl` — local CLI companion for `overlay-broker`.
//!
//! Connects to the IPC socket and sends JSON events to the broker. Host
//! shell hooks use `hook`, which forwards one event read from stdin.

use std::io::{BufRead, BufReader, Read, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "overlay-broker-ctl",
    about = "Local CLI for the overlay-broker daemon",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the broker's `ipc_name` config).
    #[arg(long, default_value = "overlay-broker")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Forward one JSON hook event read from stdin.
    Hook,

    /// List live sessions.
    Sessions,

    /// List recorded tool calls for a session.
    Calls {
        /// Session ID.
        session_id: String,
        /// Only calls of this tool.
        #[arg(long)]
        name: Option<String>,
        /// Rows to skip.
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Maximum rows.
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Per-tool call statistics for a session.
    Stats {
        /// Session ID.
        session_id: String,
    },

    /// Key-value entries in a session's store.
    Kv {
        /// Session ID.
        session_id: String,
        /// Key prefix filter.
        #[arg(long, default_value = "")]
        prefix: String,
    },
}

fn main() {
    let args = Cli::parse();

    let request_json = match &args.command {
        Command::Hook => match read_stdin_event() {
            Ok(event) => event,
            Err(err) => {
                eprintln!("Error: invalid hook event on stdin: {err}");
                std::process::exit(2);
            }
        },
        Command::Sessions => serde_json::json!({ "command": "sessions" }),
        Command::Calls {
            session_id,
            name,
            offset,
            limit,
        } => {
            let mut req = serde_json::json!({
                "command": "calls",
                "session_id": session_id,
                "offset": offset,
                "limit": limit,
            });
            if let Some(n) = name {
                req["name"] = serde_json::Value::String(n.clone());
            }
            req
        }
        Command::Stats { session_id } => {
            serde_json::json!({ "command": "stats", "session_id": session_id })
        }
        Command::Kv { session_id, prefix } => {
            serde_json::json!({ "command": "kv", "session_id": session_id, "prefix": prefix })
        }
    };

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = obj.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to broker: {err}");
            eprintln!("Is overlay-broker running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Read a single JSON object from stdin.
fn read_stdin_event() -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw)?;
    let value: serde_json::Value = serde_json::from_str(raw.trim())?;
    if !value.is_object() {
        return Err("expected a JSON object".into());
    }
    Ok(value)
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    // Send request as a single JSON line.
    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    // Read response line.
    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
