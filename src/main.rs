use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use anistream::{config, server};

const DEFAULT_LOG_FILTER: &str = "anistream=info,tower_http=info";

#[derive(Debug, Parser)]
#[command(
    name = "anistream",
    about = "Browse AniList and watch episodes through sandboxed player pages.",
    version
)]
struct Cli {
    /// Settings file (default: ~/.config/anistream/config.toml).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Open the home page in the default browser once listening.
        #[arg(long)]
        open: bool,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let result = run().await;
    if let Err(err) = &result {
        eprintln!("error: {err:?}");
    }
    result
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut settings = config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
        open: false,
    }) {
        Command::Serve { host, port, open } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            let ctx = server::AppContext::from_settings(settings)
                .context("failed to initialise server")?;
            tracing::info!(
                resolvers = ctx.resolvers.len(),
                providers = ctx.provider_names().len(),
                "starting anistream"
            );
            server::start_server(ctx, open).await
        }
        Command::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}
