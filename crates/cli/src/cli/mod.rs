pub mod chat;
pub mod replay;

use clap::{Parser, Subcommand};

use tw_domain::config::EngineConfig;

/// TurnWire — a streaming conversation engine.
#[derive(Debug, Parser)]
#[command(name = "turnwire", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chat with a conversation service (default when no subcommand is given).
    Chat {
        /// Session id (defaults to "cli:chat").
        #[arg(long, default_value = "cli:chat")]
        session: String,
        /// Conversation service base URL, overriding the config file.
        #[arg(long)]
        base_url: Option<String>,
        /// Bearer token, overriding the TURNWIRE_TOKEN environment variable.
        #[arg(long)]
        token: Option<String>,
        /// Track training phases and scores for this session.
        #[arg(long)]
        training: bool,
    },
    /// Run a captured frame log through the engine offline.
    Replay {
        /// Path to a newline-delimited JSON frame log, or "-" for stdin.
        file: String,
        /// Output the reconciled snapshot as JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },
    /// Print version information.
    Version,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `TURNWIRE_CONFIG`
/// (or `turnwire.toml` by default).  Returns the parsed [`EngineConfig`]
/// and the path that was used.
///
/// A missing file is not an error; built-in defaults apply.
pub fn load_config() -> anyhow::Result<(EngineConfig, String)> {
    let config_path =
        std::env::var("TURNWIRE_CONFIG").unwrap_or_else(|_| "turnwire.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        EngineConfig::default()
    };

    Ok((config, config_path))
}
