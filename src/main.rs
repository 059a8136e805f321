use anyhow::Result;
use clap::Parser;
use fitmirror_core::config::Config;
use fitmirror_core::discovery;
use fitmirror_core::pipeline::{self, NoopWakeLock};
use fitmirror_core::state::Lens;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to a TOML config file. Defaults are used for anything it omits.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the signaling/fallback server port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the address the signaling/fallback server binds to.
    #[arg(long)]
    bind_ip: Option<String>,

    /// Lens to open at startup.
    #[arg(long, value_enum, default_value_t = LensArg::Back)]
    lens: LensArg,

    /// Human-readable name advertised in the LAN discovery broadcast.
    #[arg(long, default_value = "fitmirror")]
    device_name: String,

    /// Disable the best-effort LAN discovery broadcast.
    #[arg(long)]
    no_discovery: bool,

    /// Enable debug-level logging (overridden by RUST_LOG if set).
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum LensArg {
    Front,
    Back,
}

impl From<LensArg> for Lens {
    fn from(arg: LensArg) -> Self {
        match arg {
            LensArg::Front => Lens::Front,
            LensArg::Back => Lens::Back,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind_ip) = &args.bind_ip {
        config.server.bind_ip = bind_ip.clone();
    }
    config.validate()?;

    info!(port = config.server.port, "starting fitmirror-core");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    if !args.no_discovery {
        let bind_ip = config.server.bind_ip.clone();
        let port = config.server.port;
        let name = args.device_name.clone();
        tokio::spawn(discovery::run(bind_ip, port, name));
    }

    pipeline::run(
        config,
        Lens::from(args.lens),
        Arc::new(NoopWakeLock),
        shutdown_rx,
    )
    .await?;
    Ok(())
}
