use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use worksync::api::{self, SecurityConfig};
use worksync::config::ServerConfig;
use worksync::mcp;
use worksync::tracker::WorkTracker;

#[derive(Parser)]
#[command(name = "worksync")]
#[command(about = "Shared work tracking server for multi-agent coordination")]
struct Cli {
    /// Data root holding config.yaml, projects/ and guidance/ (overrides WORKSYNC_DATA_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server over streamable HTTP
    Serve {
        /// Bind address (overrides WORKSYNC_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port for HTTP (overrides WORKSYNC_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Start MCP server via stdio
    Mcp,
    /// Regenerate the vault now and exit
    Sync {
        /// Only this project; all registered projects when omitted
        project: Option<String>,
    },
}

/// Initialize tracing with output to stderr (for MCP mode) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "worksync=debug,tower_http=debug".into()),
    );

    if use_stderr {
        // MCP mode: log to stderr so stdout is clean for protocol
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let use_stderr = matches!(cli.command, Some(Commands::Mcp));
    init_tracing(use_stderr);

    let mut config = ServerConfig::from_env();
    if let Some(root) = cli.root {
        config.data_root = root;
    }

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await?;
        }
        Commands::Mcp => {
            let tracker = WorkTracker::open(&config);
            let result = mcp::run_stdio_server(tracker.clone()).await;
            shutdown_scheduler(&tracker, &config).await;
            result?;
        }
        Commands::Sync { project } => {
            config.auto_sync = false;
            let tracker = WorkTracker::open(&config);
            let report = tracker.sync(project.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.failed.is_empty() {
                bail!("{} project(s) failed to sync", report.failed.len());
            }
        }
    }

    Ok(())
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let security = SecurityConfig::from_server_config(&config);
    if !security.is_enabled() {
        if !config.debug {
            bail!("WORKSYNC_API_KEY is not set; refusing to serve without authentication (set WORKSYNC_DEBUG=1 to override)");
        }
        tracing::warn!("Serving without authentication (debug mode)");
    }

    let tracker = WorkTracker::open(&config);
    tracing::info!(
        data_root = %config.data_root.display(),
        auto_sync = config.auto_sync,
        "Starting WorkSync server"
    );

    let app = api::create_router(tracker.clone(), security);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("WorkSync MCP endpoint listening on http://{}/mcp", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_scheduler(&tracker, &config).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

async fn shutdown_scheduler(tracker: &WorkTracker, config: &ServerConfig) {
    if let Some(scheduler) = tracker.coordinator().scheduler() {
        tracing::info!(policy = %config.shutdown, pending = ?scheduler.pending(), "Stopping vault scheduler");
        scheduler.shutdown(config.shutdown).await;
    }
}
