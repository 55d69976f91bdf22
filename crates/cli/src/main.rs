//! `turnwire` binary entry point.
//!
//! Parses the command line, loads configuration, and dispatches to the
//! chat REPL or the offline replay command.

mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to chat when no subcommand is given.
        None => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            cli::chat::chat(config, "cli:chat".into(), None, false).await
        }
        Some(Command::Chat {
            session,
            base_url,
            token,
            training,
        }) => {
            init_cli_tracing();
            let (mut config, _) = cli::load_config()?;
            if let Some(base_url) = base_url {
                config.channel.base_url = base_url;
            }
            cli::chat::chat(config, session, token, training).await
        }
        Some(Command::Replay { file, json }) => {
            init_cli_tracing();
            cli::replay::replay(&file, json)
        }
        Some(Command::Version) => {
            println!("turnwire {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Minimal tracing setup for CLI commands: compact stderr output so
/// streamed responses on stdout stay clean, `RUST_LOG` respected, `warn`
/// by default.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
