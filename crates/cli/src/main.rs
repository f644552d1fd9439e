//! preauth CLI
//!
//! Terminal front end for a preauth download session: watch the mirrored
//! session, revoke download tokens and print download links.

mod cmd_delete;
mod cmd_links;
mod cmd_watch;
mod config;
mod logging;
mod render;

use std::time::Duration;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use preauth_client::SessionClient;
use preauth_protocol::DownloadToken;
use tracing::info;

use crate::config::{GlobalArgs, Settings};
use crate::logging::init_logging;

const DEFAULT_WAIT_SECS: u64 = 15;

#[derive(Parser)]
#[command(name = "preauth")]
#[command(version, about = "preauth CLI - watch a download session and manage its tokens", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the session until interrupted
    Watch {
        /// Print newline-delimited JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Revoke a download token (decimal or 0x-prefixed hex)
    Delete {
        #[arg(value_parser = cmd_delete::parse_token)]
        token: DownloadToken,

        /// Seconds to wait for the server at each step
        #[arg(long, default_value_t = DEFAULT_WAIT_SECS)]
        timeout: u64,
    },

    /// Print download links for every available platform
    Links {
        /// Seconds to wait for the executable catalog
        #[arg(long, default_value_t = DEFAULT_WAIT_SECS)]
        timeout: u64,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "preauth", &mut std::io::stdout());
        return Ok(());
    }

    let settings = Settings::load(&cli.global)?;
    let _logging = init_logging(settings.log_dir.as_deref())?;

    let client = SessionClient::start(settings.client_config()?);
    info!(
        component = "cli",
        event = "cli.started",
        channel = %client.endpoints().channel(),
        "preauth CLI started"
    );

    let outcome = match cli.command {
        Commands::Watch { json } => cmd_watch::run(&client, json).await,
        Commands::Delete { token, timeout } => {
            cmd_delete::run(&client, token, Duration::from_secs(timeout)).await
        }
        Commands::Links { timeout } => cmd_links::run(&client, Duration::from_secs(timeout)).await,
        Commands::Completions { .. } => Ok(()),
    };

    client.dispose().await;
    outcome
}
