//! podexec - exec session daemon.
//!
//! Starts the HTTP/WebSocket control plane, wires the configured execution
//! provider, and runs the idle watchdog that retires the process when no
//! requests or session output arrive for the configured period.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use podexec::{
    activity::{run_watchdog, ActivityMonitor},
    api::{self, AppState, RouterConfig},
    config::Settings,
    events::NullNotifier,
    local::LocalExecutor,
    manager::{ExecManager, ManagerConfig},
    provider::ProviderRegistry,
    remote::{ContainerResolver, RemoteExecutor},
    shutdown::{CoordinatorStop, ShutdownCoordinator},
};

/// podexec - run commands inside containers over HTTP/WebSocket.
#[derive(Parser, Debug)]
#[command(name = "podexec", version, about, long_about = None)]
struct Cli {
    /// Path to the TOML settings file
    #[arg(long, default_value = "podexec.toml")]
    config: PathBuf,

    /// Address to bind the HTTP/WebSocket API server (overrides config)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// API authentication token
    #[arg(long, env = "PODEXEC_TOKEN")]
    token: Option<String>,

    /// Execution provider name (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Idle seconds before self-shutdown; 0 disables (overrides config)
    #[arg(long)]
    idle_timeout: Option<i64>,

    /// Origin allowed to make cross-origin API calls (repeatable)
    #[arg(long = "cors-origin")]
    cors_origins: Vec<String>,
}

/// How long a single graceful stop attempt may take before the watchdog
/// counts it as unacknowledged.
const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut settings = Settings::load(&cli.config)?;
    if let Some(bind) = cli.bind {
        settings.bind = bind;
    }
    if let Some(provider) = cli.provider.clone() {
        settings.provider = provider;
    }
    if let Some(idle) = cli.idle_timeout {
        settings.idle_timeout_seconds = idle;
    }
    settings.validate()?;
    settings.report();

    if !settings.bind.ip().is_loopback() && cli.token.is_none() {
        tracing::warn!(
            "binding to a non-loopback address without --token; the API is unauthenticated"
        );
    }

    // Provider composition. Every available strategy is registered here,
    // explicitly; the local provider also serves as the container resolver.
    let local = Arc::new(LocalExecutor::new());
    let mut providers = ProviderRegistry::new();
    {
        let local = Arc::clone(&local);
        providers.register("local", move |_| {
            Ok(Arc::clone(&local) as Arc<dyn RemoteExecutor>)
        });
    }
    let executor = providers.create(&settings.provider, &settings)?;
    let resolver: Arc<dyn ContainerResolver> = local;

    let activity = ActivityMonitor::new();
    let shutdown = ShutdownCoordinator::new();
    let manager = ExecManager::new(
        executor,
        resolver,
        Arc::new(NullNotifier),
        activity.clone(),
        ManagerConfig {
            replay_capacity: settings.replay_capacity,
            viewer_backlog: settings.viewer_backlog,
            grace_window: settings.grace_window(),
            max_sessions: settings.max_sessions,
        },
    );

    // Ctrl-C feeds the same two-phase shutdown path as the idle watchdog.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
                shutdown.request();
            }
        });
    }

    tokio::spawn(run_watchdog(
        activity.clone(),
        settings.idle_policy(),
        Arc::new(CoordinatorStop {
            coordinator: shutdown.clone(),
            ack_timeout: STOP_ACK_TIMEOUT,
        }),
        || std::process::exit(1),
    ));

    let state = AppState {
        manager: manager.clone(),
        activity,
        shutdown: shutdown.clone(),
    };
    let app = api::router(
        state,
        RouterConfig {
            token: cli.token,
            cors_origins: cli.cors_origins,
        },
    );

    let listener = tokio::net::TcpListener::bind(settings.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_shutdown.wait_requested().await })
        .await?;

    // Graceful phase: close sessions, then acknowledge so the watchdog does
    // not escalate to a forced exit.
    manager.shutdown();
    shutdown.acknowledge();
    tracing::info!("shutdown complete");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "podexec=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
