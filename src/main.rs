mod bundle;
mod calc;
mod config;
mod db;
mod error;
mod ipc;
mod logging;
mod reports;
mod results;
mod roster;
mod scores;

use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};

fn main() {
    let config = config::Config::from_env();
    // stdout carries responses only; logs go to stderr.
    if let Err(e) = logging::init(&config) {
        eprintln!("resultsd: logging disabled: {e:#}");
    }

    let mut state = ipc::AppState::new(config);
    if let Some(path) = state.config.workspace.clone() {
        if let Err(e) = ipc::select_workspace(&mut state, &path) {
            error!(workspace = %path.to_string_lossy(), error = %format!("{e:#}"), "startup workspace unavailable");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "resultsd ready");

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
                // No id to reply to.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
