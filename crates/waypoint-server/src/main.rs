use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use waypoint_server::ServerBuilder;
use waypoint_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};

/// Waypoint authorization server and protected API.
#[derive(Debug, Parser)]
#[command(name = "waypoint", version, about)]
struct Cli {
    /// Configuration file (TOML).
    #[arg(short, long, env = "WAYPOINT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive, overrides `[logging] level`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    let cli = Cli::parse();
    waypoint_server::observability::init_tracing();

    let path = cli
        .config
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned());
    let cfg = load_config(path.as_deref())
        .map_err(anyhow::Error::msg)
        .context("loading configuration")?;
    tracing::info!(
        path = path.as_deref().unwrap_or(DEFAULT_CONFIG_PATH),
        "Configuration loaded"
    );

    let level = cli.log_level.as_deref().unwrap_or(&cfg.logging.level);
    waypoint_server::observability::apply_logging_level(level);

    let server = ServerBuilder::new().with_config(cfg).build().await?;
    server.run().await
}
