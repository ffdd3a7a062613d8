//! CLI entry point for conduit.

mod cli;
mod commands;
mod output;

use clap::Parser;
use conduit_observability::ObservabilityConfig;

use crate::cli::{Cli, OutputFormat};

/// Load `.env` files: `<config dir>/conduit/env` first, then the nearest
/// `.env` walking up from the working directory. Variables already set in
/// the environment win.
fn load_env_files() {
    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("conduit").join("env");
        if global.exists() {
            let _ = dotenvy::from_path(&global);
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd;
        for _ in 0..32 {
            let env_file = dir.join(".env");
            if env_file.exists() {
                let _ = dotenvy::from_path(&env_file);
                break;
            }
            if let Some(parent) = dir.parent() {
                dir = parent.to_path_buf();
            } else {
                break;
            }
        }
    }
}

fn init_logging(cli: &Cli) {
    let mut config = ObservabilityConfig::from_env()
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_ansi(matches!(cli.output, OutputFormat::Text));
    if cli.verbose {
        config = config.with_log_level("conduit_mcp=debug,conduit_cli=debug,info");
    }
    if let Err(e) = conduit_observability::init(config) {
        output::warning(&e.to_string());
    }
}

#[tokio::main]
async fn main() {
    load_env_files();
    let cli = Cli::parse();
    output::init(cli.output);
    init_logging(&cli);

    let result = commands::handle(cli).await;
    conduit_observability::shutdown();

    if let Err(e) = result {
        output::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
