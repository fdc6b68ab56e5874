//! jointd - joint-group daemon
//!
//! Opens the configured board (simulated unless a driver is linked in),
//! serves requests from stdin or zenoh and streams joint state telemetry.

use anyhow::{Context, Result};
use clap::Parser;
use jointd::{
    config::{CONFIG_ENV, DEFAULT_CONFIG_PATH},
    shutdown_signal, CommandStream, ConsoleTelemetry, DaemonConfig, Frontend, JointService, TelemetrySink,
};
use std::sync::Arc;
use tokio::io::{self, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jointd")]
#[command(about = "Joint-group daemon - unit-mapped control board with streaming telemetry")]
#[command(version)]
struct Args {
    /// Path to the daemon configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Do not publish joint state telemetry
    #[arg(long)]
    no_telemetry: bool,

    /// Pretty-print telemetry frames on stdout
    #[arg(long)]
    pretty: bool,
}

impl Args {
    fn get_config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.get_config_path();

    // stdout carries replies and telemetry
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Joint-group daemon");
    info!("Using config: {}", config_path);

    let config = DaemonConfig::load_from_path(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    match config.command.frontend {
        Frontend::Stdio => run_stdio(&args, &config).await,
        Frontend::Zenoh => run_zenoh(&args, &config).await,
    }
}

async fn run_stdio(args: &Args, config: &DaemonConfig) -> Result<()> {
    let sink: Option<Arc<dyn TelemetrySink>> = if args.no_telemetry {
        None
    } else if args.pretty {
        Some(Arc::new(ConsoleTelemetry::pretty()))
    } else {
        Some(Arc::new(ConsoleTelemetry::new()))
    };

    let service = JointService::start_simulated(config, sink).context("Failed to start joint service")?;
    info!("Ready for commands, type 'help' for the command list");

    let mut stream = CommandStream::new(service.client(), BufReader::new(io::stdin()), io::stdout());
    let result = stream.run(shutdown_signal()).await;

    let stats = service.shutdown().await.context("Failed during shutdown")?;
    match result {
        Ok(commands) => {
            info!(
                "Handled {} commands ({} ok, {} failed)",
                commands.total, commands.succeeded, commands.failed
            );
        }
        Err(e) => {
            error!("Command stream error: {}", e);
            return Err(e);
        }
    }
    if let Some(publisher) = stats.publisher {
        info!("Published {} frames, {} overruns", publisher.published, publisher.overruns);
    }
    info!("Shutdown complete");
    Ok(())
}

#[cfg(feature = "zenoh-integration")]
async fn run_zenoh(args: &Args, config: &DaemonConfig) -> Result<()> {
    use jointd::zenoh_transport::{open_session, ZenohRpcFrontend, ZenohTelemetry};

    let session = Arc::new(open_session().await?);
    let prefix = config.command.key_prefix();

    let sink: Option<Arc<dyn TelemetrySink>> = if args.no_telemetry {
        None
    } else {
        Some(Arc::new(ZenohTelemetry::new(Arc::clone(&session), prefix).await?))
    };

    let service = JointService::start_simulated(config, sink).context("Failed to start joint service")?;
    let frontend = ZenohRpcFrontend::new(Arc::clone(&session), prefix);
    let client = service.client();
    let frontend_task = tokio::spawn(async move {
        if let Err(e) = frontend.serve(client).await {
            error!("Zenoh frontend stopped: {}", e);
        }
    });

    info!("Serving over zenoh, Ctrl+C to stop");
    shutdown_signal().await;

    frontend_task.abort();
    let stats = service.shutdown().await.context("Failed during shutdown")?;
    info!("Answered {} requests", stats.requests);
    info!("Shutdown complete");
    Ok(())
}

#[cfg(not(feature = "zenoh-integration"))]
async fn run_zenoh(_args: &Args, _config: &DaemonConfig) -> Result<()> {
    anyhow::bail!("frontend 'zenoh' requires the zenoh-integration feature (cargo run --features zenoh-integration)")
}
