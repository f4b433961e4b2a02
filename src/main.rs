// ABOUTME: Main entry point for relaybot - long-poll sync clients plus service pollers
// ABOUTME: Initializes logging, config, database, listeners, scheduler, and the HTTP server

use anyhow::{Context, Result};
use clap::Parser;
use relaybot::{
    autojoin::{self, AutoJoinPolicy},
    config::{ClientConfig, Config},
    metrics, pollers,
    server::{self, ServerState},
    store::Database,
};
use relaybot_core::{HttpTransport, ListenerRegistry, PollingScheduler, SyncClient, SyncTransport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "relaybot", version, about = "Chat bot bridge with long-poll sync and service pollers")]
struct Cli {
    /// Path to config.toml (overrides the default search)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not start any sync loops
    #[arg(long)]
    no_sync: bool,

    /// Do not start the polling scheduler
    #[arg(long)]
    no_poll: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            panic = %panic_info,
            backtrace = ?std::backtrace::Backtrace::force_capture(),
            "Panic"
        );
    }));

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting relaybot");

    let cli = Cli::parse();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    tracing::info!(
        clients = config.clients.len(),
        services = config.services.len(),
        database = %config.database.path,
        http_enabled = config.http.enabled,
        "Configuration loaded"
    );

    let metrics_handle =
        metrics::init_metrics().context("Failed to initialize Prometheus metrics")?;

    let database = Arc::new(Database::open(&config.database.path)?);

    // Seed configured services; runtime additions live only in the database.
    for service in &config.services {
        database
            .upsert_service(&service.to_record())
            .with_context(|| format!("Failed to save service {}", service.id))?;
    }

    let scheduler = PollingScheduler::new(
        pollers::builtin_registry(),
        database.clone(),
        database.clone(),
    );
    if cli.no_poll {
        tracing::info!("Polling disabled by --no-poll");
    } else {
        scheduler.start()?;
    }

    let mut clients = Vec::new();
    for client_config in config.clients.iter().filter(|c| c.sync) {
        let client = build_client(&config, client_config, &database)?;
        if cli.no_sync {
            tracing::info!(user_id = %client_config.user_id, "Sync disabled by --no-sync");
        } else {
            client.start();
        }
        clients.push(client);
    }

    if config.http.enabled {
        let addr = config.http_addr();
        let state = ServerState {
            clients: clients.clone(),
            scheduler: scheduler.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = server::serve(&addr, state, metrics_handle).await {
                tracing::error!(error = %e, "HTTP server failed");
            }
        });
    }

    tracing::info!("relaybot ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    for client in &clients {
        client.stop();
    }
    scheduler.stop_all();

    tracing::info!("relaybot stopped");
    Ok(())
}

fn build_client(
    config: &Config,
    client_config: &ClientConfig,
    database: &Arc<Database>,
) -> Result<Arc<SyncClient>> {
    let transport: Arc<dyn SyncTransport> = Arc::new(
        HttpTransport::new(&client_config.home_server, &client_config.access_token)
            .with_context(|| format!("Invalid home_server for {}", client_config.user_id))?,
    );

    let mut listeners = ListenerRegistry::new();
    if client_config.auto_join_rooms {
        autojoin::register(
            &mut listeners,
            AutoJoinPolicy::new(&client_config.user_id, &client_config.allowed_inviters),
            Arc::clone(&transport),
        );
    }

    tracing::info!(
        user_id = %client_config.user_id,
        home_server = %client_config.home_server,
        auto_join = client_config.auto_join_rooms,
        "Sync client configured"
    );

    Ok(Arc::new(SyncClient::new(
        config.sync_config(client_config),
        transport,
        database.clone(),
        Arc::new(listeners),
    )))
}
