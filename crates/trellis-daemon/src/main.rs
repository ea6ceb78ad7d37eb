use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

use trellis_daemon::{Daemon, DaemonConfig};
use trellis_sync::LoopbackAuthority;

#[derive(Parser)]
#[command(
    name = "trellisd",
    about = "Trellis sync daemon: local metadata engine",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the configuration.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Raise the log level; repeat for more.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print a state snapshot as JSON on shutdown.
    #[arg(long)]
    dump: bool,
}

fn log_level(configured: &str, verbose: u8) -> anyhow::Result<LevelFilter> {
    let base: LevelFilter = configured
        .parse()
        .with_context(|| format!("invalid log_level {configured:?}"))?;
    Ok(match verbose {
        0 => base,
        1 => base.max(LevelFilter::DEBUG),
        _ => LevelFilter::TRACE,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    tracing_subscriber::fmt()
        .with_max_level(log_level(&config.log_level, cli.verbose)?)
        .init();

    let mut daemon = Daemon::open(config).context("failed to open daemon")?;
    daemon.start(Arc::new(LoopbackAuthority::new())).await?;
    info!("running standalone; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    if cli.dump {
        let dump = daemon.dump().await?;
        println!("{}", serde_json::to_string_pretty(&dump)?);
    }
    daemon.shutdown().await?;
    Ok(())
}
