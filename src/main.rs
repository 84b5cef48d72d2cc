mod assign;
mod config;
mod customers;
mod db;
mod error;
mod filter;
mod ipc;
mod model;
mod owners;
mod sheet;
mod sheet_store;
mod upsert;
mod visits;

use std::io::{self, BufRead, Write};

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Args, Config};

fn main() {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("recoveryd=info")),
        )
        .init();

    let config = Config::from(Args::parse());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        max_batch = config.max_batch,
        "recoveryd starting"
    );

    let mut state = ipc::AppState::new(config.clone());
    if let Some(path) = config.workspace.as_deref() {
        if let Err(e) = state.open_workspace(path) {
            error!(workspace = %path.display(), error = %e, "could not open start-up workspace");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("recoveryd exiting");
}
