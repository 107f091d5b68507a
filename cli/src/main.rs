//! Lore CLI Entry Point
//!
//! Invoked by host lifecycle hooks:
//! - `record` at session end
//! - `recall` at session start, mid-session and before compaction
//! - `cite` when the host reports which memories helped

use clap::Parser;
use lore_cli::Cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries rendered output only
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lore_cli=info,lore_memory=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    if let Err(e) = lore_cli::run(cli, &mut stdin.lock(), &mut stdout.lock()) {
        let code = e.exit_code();
        if code == 0 {
            tracing::warn!("Memory unavailable: {}", e);
        } else {
            tracing::error!("{}", e);
        }
        std::process::exit(code);
    }
}
