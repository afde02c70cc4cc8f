//! Workpod CLI - run and query the local workspace daemon

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use workpod_daemon::{Daemon, DaemonClient, DaemonConfig, Endpoint};
use workpod_proto::VersionResponse;

/// Workpod - remote development workspaces
#[derive(Parser, Debug)]
#[command(name = "workpod")]
#[command(about = "Workpod - remote development workspaces")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon in the foreground
    Daemon(DaemonArgs),
    /// Show the status of a running daemon
    Status {
        #[command(flatten)]
        target: TargetArgs,

        /// Include configuration and overlay details
        #[arg(long)]
        debug: bool,
    },
    /// Ask a running daemon to shut down
    Stop {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Show version information
    Version,
}

/// Which daemon to talk to
#[derive(Args, Debug)]
struct TargetArgs {
    /// Configuration file (JSON)
    #[arg(long, env = "WORKPOD_CONFIG")]
    config: Option<PathBuf>,

    /// Provider identity; names the IPC endpoint
    #[arg(long, env = "WORKPOD_PROVIDER")]
    provider: Option<String>,

    /// Directory holding the IPC socket
    #[arg(long, env = "WORKPOD_RUNTIME_DIR")]
    runtime_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DaemonArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Platform API URL
    #[arg(long, env = "WORKPOD_PLATFORM_URL")]
    platform_url: Option<String>,

    /// Platform access key
    #[arg(long, env = "WORKPOD_ACCESS_KEY", hide_env_values = true)]
    access_key: Option<String>,

    /// Overlay node binary (attach to a running node when unset)
    #[arg(long, env = "WORKPOD_OVERLAY_BINARY")]
    overlay_binary: Option<PathBuf>,

    /// Overlay node state directory
    #[arg(long, env = "WORKPOD_OVERLAY_STATE_DIR")]
    overlay_state_dir: Option<PathBuf>,

    /// Overlay coordination server URL
    #[arg(long, env = "WORKPOD_OVERLAY_CONTROL_URL")]
    overlay_control_url: Option<String>,

    /// Pre-authorized overlay key
    #[arg(long, env = "WORKPOD_OVERLAY_AUTH_KEY", hide_env_values = true)]
    overlay_auth_key: Option<String>,

    /// Hostname announced on the overlay network
    #[arg(long, env = "WORKPOD_HOSTNAME")]
    hostname: Option<String>,

    /// Local workspace store directory
    #[arg(long, env = "WORKPOD_WORKSPACE_STORE_DIR")]
    workspace_store_dir: Option<PathBuf>,

    /// Project for workspace requests that name none
    #[arg(long, env = "WORKPOD_PROJECT")]
    project: Option<String>,

    /// Only show workspaces owned by you or your team
    #[arg(long, env = "WORKPOD_OWNED_ONLY")]
    owned_only: bool,

    /// Write network map snapshots to this file
    #[arg(long, env = "WORKPOD_NETMAP_PATH")]
    netmap_path: Option<PathBuf>,
}

impl TargetArgs {
    fn load(&self) -> Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => DaemonConfig::default(),
        };
        if let Some(provider) = &self.provider {
            config.provider = provider.clone();
        }
        if let Some(runtime_dir) = &self.runtime_dir {
            config.runtime_dir = runtime_dir.clone();
        }
        Ok(config)
    }

    fn client(&self) -> Result<DaemonClient> {
        let config = self.load()?;
        Ok(DaemonClient::new(Endpoint::Local(config.socket_path())))
    }
}

impl DaemonArgs {
    fn into_config(self) -> Result<DaemonConfig> {
        let mut config = self.target.load()?;
        if let Some(url) = self.platform_url {
            config.platform_url = url;
        }
        if self.access_key.is_some() {
            config.access_key = self.access_key;
        }
        if self.overlay_binary.is_some() {
            config.overlay.binary = self.overlay_binary;
        }
        if let Some(dir) = self.overlay_state_dir {
            config.overlay.state_dir = dir;
        }
        if let Some(url) = self.overlay_control_url {
            config.overlay.control_url = url;
        }
        if self.overlay_auth_key.is_some() {
            config.overlay.auth_key = self.overlay_auth_key;
        }
        if let Some(hostname) = self.hostname {
            config.overlay.hostname = hostname;
        }
        if let Some(dir) = self.workspace_store_dir {
            config.workspace_store_dir = dir;
        }
        if self.project.is_some() {
            config.default_project = self.project;
        }
        if self.owned_only {
            config.owned_only = true;
        }
        if self.netmap_path.is_some() {
            config.netmap_path = self.netmap_path;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Daemon(args) => run_daemon(args.into_config()?).await,
        Commands::Status { target, debug } => {
            let status = target
                .client()?
                .status(debug)
                .await
                .context("Failed to query daemon status")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Stop { target } => {
            target
                .client()?
                .shutdown()
                .await
                .context("Failed to stop daemon")?;
            println!("Daemon is shutting down");
            Ok(())
        }
        Commands::Version => {
            println!("workpod {}", env!("GIT_TAG"));
            println!("Commit: {}", env!("GIT_HASH"));
            println!("Built: {}", env!("BUILD_TIME"));
            Ok(())
        }
    }
}

async fn run_daemon(config: DaemonConfig) -> Result<()> {
    info!(
        provider = %config.provider,
        socket = %config.socket_path().display(),
        "Starting workpod daemon {}",
        env!("GIT_TAG")
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                signal_cancel.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let version = VersionResponse {
        version: env!("GIT_TAG").to_string(),
        commit: env!("GIT_HASH").to_string(),
    };
    Daemon::new(config, version)
        .run(cancel)
        .await
        .context("Daemon failed")
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
