mod aggregate;
mod db;
mod error;
mod history;
mod ipc;
mod model;
mod org;
mod principal;
mod store;
mod visibility;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Daily attendance reporting sidecar. Reads one JSON request per line on
/// stdin and answers one JSON line per request on stdout.
#[derive(Debug, Parser)]
#[command(name = "rollcalld", version)]
struct Cli {
    /// Workspace directory to open at startup.
    #[arg(long, env = "ROLLCALL_WORKSPACE")]
    workspace: Option<PathBuf>,

    #[arg(long, env = "ROLLCALL_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Rows fetched per page when walking report and summary history.
    #[arg(long, env = "ROLLCALL_HISTORY_PAGE_SIZE", default_value_t = 50,
          value_parser = clap::value_parser!(u32).range(1..))]
    history_page_size: u32,
}

// stdout is the protocol channel, so logs always go to stderr.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        history_page_size: cli.history_page_size as usize,
    };
    if let Some(path) = cli.workspace {
        let conn = db::open_db(&path)
            .with_context(|| format!("open workspace {}", path.display()))?;
        info!(workspace = %path.display(), "workspace opened");
        state.workspace = Some(path);
        state.db = Some(conn);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    info!(version = env!("CARGO_PKG_VERSION"), "rollcalld ready");

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

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                warn!(error = %e, "unparseable request line");
                // Echo the id back when the line is JSON but not a valid request.
                let id = serde_json::from_str::<serde_json::Value>(&line)
                    .ok()
                    .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
                    .unwrap_or_default();
                ipc::err(&id, "bad_json", e.to_string(), None)
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    Ok(())
}
