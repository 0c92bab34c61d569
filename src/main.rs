use agent_relay::api::{create_router, AppState};
use agent_relay::config::{AppConfig, LoggingConfig, StoreBackend};
use agent_relay::coordinator::Coordinator;
use agent_relay::persistence::{InMemoryRunStore, PostgresRunStore, RunStore};
use agent_relay::runner::{ChainTools, ExecutionRunner, GatewayChain, ScriptedAgent, SimulatedChain};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Single-flight agent run relay
#[derive(Parser, Debug)]
#[command(name = "agent-relay")]
#[command(author, version, about = "Admits, runs and reports strategy agent runs per subscription")]
struct Cli {
    /// Directory holding default.toml and per-environment overrides
    #[arg(long, global = true, default_value = "config", env = "RELAY_CONFIG_DIR")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Override server.port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Load and validate configuration, then exit
    CheckConfig,
}

/// How often expired run records are purged from the store
const STORE_JANITOR_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir.display()))?;

    match cli.command {
        Commands::CheckConfig => {
            init_logging_simple();
            match config.validate() {
                Ok(()) => {
                    println!("configuration OK");
                    println!("  server:        {}:{}", config.server.host, config.server.port);
                    println!("  flush delay:   {} ms", config.coordinator.flush_delay_ms);
                    println!("  store:         {:?}", config.store.backend);
                    println!(
                        "  tool gateway:  {}",
                        config.runner.tool_gateway_url.as_deref().unwrap_or("simulated")
                    );
                    Ok(())
                }
                Err(errors) => {
                    for e in &errors {
                        eprintln!("  - {}", e);
                    }
                    anyhow::bail!("configuration has {} problem(s)", errors.len())
                }
            }
        }
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            init_logging(&config.logging);
            if let Err(errors) = config.validate() {
                for e in &errors {
                    error!("Invalid configuration: {}", e);
                }
                anyhow::bail!("configuration has {} problem(s)", errors.len());
            }
            run_server(config).await
        }
    }
}

async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let store = build_store(&config).await?;
    let coordinator = Coordinator::new(config.coordinator.clone(), store);
    let handle = coordinator.handle();
    info!(
        instance_id = %handle.instance_id(),
        store = handle.store_name(),
        flush_delay_ms = config.coordinator.flush_delay_ms,
        "Coordinator ready"
    );

    let tools: Arc<dyn ChainTools> = match config.runner.tool_gateway_url.as_deref() {
        Some(url) => {
            info!(gateway = url, "Using chain tool gateway");
            Arc::new(GatewayChain::new(
                url,
                Duration::from_millis(config.runner.request_timeout_ms),
            )?)
        }
        None => {
            warn!("No tool gateway configured; using the simulated chain");
            Arc::new(SimulatedChain::default())
        }
    };
    let agent = Arc::new(ScriptedAgent::new(Duration::from_millis(
        config.runner.step_delay_ms,
    )));
    let runner = ExecutionRunner::new(handle.clone(), agent, tools);

    let app = create_router(AppState::new(handle, runner.clone()));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let in_flight = runner.active_runs();
    if in_flight > 0 {
        warn!(in_flight, "Shutting down with runs still in progress");
    }
    info!("API server stopped");
    Ok(())
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn RunStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            let store = Arc::new(InMemoryRunStore::new());
            let janitor = Arc::clone(&store);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(STORE_JANITOR_INTERVAL);
                loop {
                    ticker.tick().await;
                    let purged = janitor.purge_expired();
                    if purged > 0 {
                        info!(purged, "Purged expired run records");
                    }
                }
            });
            Ok(store as Arc<dyn RunStore>)
        }
        StoreBackend::Postgres => {
            let url = config
                .store
                .database_url
                .as_deref()
                .context("store.database_url is required for the postgres backend")?;
            let store = Arc::new(PostgresRunStore::new(url, config.store.max_connections).await?);
            store.migrate().await?;
            let janitor = Arc::clone(&store);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(STORE_JANITOR_INTERVAL);
                loop {
                    ticker.tick().await;
                    match janitor.purge_expired().await {
                        Ok(0) => {}
                        Ok(purged) => info!(purged, "Purged expired run records"),
                        Err(e) => warn!("Failed to purge expired run records: {}", e),
                    }
                }
            });
            Ok(store as Arc<dyn RunStore>)
        }
    }
}

/// Initialize logging with console output and an optional daily rotating file
fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},agent_relay=debug,sqlx=warn",
            logging.level
        ))
    });

    // `tracing_appender::rolling::daily` panics if it cannot create the first
    // file, so check writability up front.
    let file_layer = logging.dir.as_deref().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                log_dir, e
            );
            return None;
        }
        let test_path = std::path::Path::new(log_dir).join(".relay_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(log_dir, "agent-relay.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // The process logs until exit, so the guard lives forever
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    });

    let (json_layer, console_layer) = if logging.json {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true),
            ),
            None,
        )
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();
}

/// Minimal logging for one-shot commands
fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
