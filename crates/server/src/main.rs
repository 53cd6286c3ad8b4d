use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use remind_bus::{MemoryBus, MessageBus, RabbitBus};
use remind_push::{FcmClient, FcmConfig, NoopPushClient, PushClient};
use remind_scheduler::{
    DispatchWorker, IngestWorker, ReminderMetrics, Scheduler, SchedulerConfig,
};
use remind_server::api::AppState;
use remind_server::config::ServiceConfig;
use remind_state::{ReminderStore, SuppressionSource, UserProfileSource};
use remind_state_memory::{MemoryReminderStore, MemorySuppressionSource, MemoryUserProfileSource};
use remind_state_postgres::{
    PostgresConfig, PostgresReminderStore, PostgresSuppressionSource, PostgresUserProfileSource,
};

/// Reminders service HTTP server and workers.
#[derive(Parser, Debug)]
#[command(name = "remind-server", about = "Reminders service")]
struct Cli {
    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber from RUST_LOG or default to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Arc::new(ServiceConfig::from_env()?);

    // Store backend: Postgres when configured, otherwise in-memory dev mode.
    let (store, suppression, profiles): (
        Arc<dyn ReminderStore>,
        Arc<dyn SuppressionSource>,
        Arc<dyn UserProfileSource>,
    ) = match config.database_url {
        Some(ref url) => {
            let pg_config = PostgresConfig {
                url: url.clone(),
                pool_size: config.database_pool_size,
                ..PostgresConfig::default()
            };
            let store = PostgresReminderStore::new(pg_config).await?;
            let pool = store.pool().clone();
            info!("postgres store initialized");
            (
                Arc::new(store),
                Arc::new(PostgresSuppressionSource::new(pool.clone())),
                Arc::new(PostgresUserProfileSource::new(pool)),
            )
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory store (state is not durable)");
            (
                Arc::new(MemoryReminderStore::new()),
                Arc::new(MemorySuppressionSource::new()),
                Arc::new(MemoryUserProfileSource::new()),
            )
        }
    };

    // Broker: RabbitMQ when configured, otherwise in-process dev mode.
    let bus: Arc<dyn MessageBus> = match config.rabbitmq_url {
        Some(ref url) => {
            let bus = RabbitBus::connect(url, config.topology()).await?;
            info!("rabbitmq bus connected");
            Arc::new(bus)
        }
        None => {
            warn!("RABBITMQ_URL not set, using the in-process bus (queues are not durable)");
            Arc::new(MemoryBus::new(config.topology()))
        }
    };

    // Push provider: FCM when credentials are present, otherwise a no-op.
    let push: Arc<dyn PushClient> = match (&config.fcm_project_id, &config.fcm_credentials_json) {
        (Some(project_id), Some(credentials)) => {
            let mut fcm_config = FcmConfig::new(project_id, credentials);
            fcm_config.timeout = config.push_timeout;
            match FcmClient::new(fcm_config).await {
                Ok(client) => {
                    info!(project_id = %project_id, "FCM push client initialized");
                    Arc::new(client)
                }
                Err(e) => {
                    warn!(error = %e, "FCM initialization failed, push disabled");
                    Arc::new(NoopPushClient::new())
                }
            }
        }
        _ => Arc::new(NoopPushClient::new()),
    };

    let metrics = Arc::new(ReminderMetrics::default());

    // Periodic scans.
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&suppression),
        Arc::clone(&profiles),
        Arc::clone(&metrics),
        SchedulerConfig {
            scan_interval: config.scan_interval,
            cleanup_interval: config.cleanup_interval,
            batch_size: config.batch_size,
            output_routing_key: config.output_routing_key.clone(),
            default_timezone: config.default_timezone,
        },
    ));
    tokio::spawn(Arc::clone(&scheduler).run());

    // Queue workers.
    for worker in 0..config.worker_concurrency {
        let ingest = IngestWorker::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&metrics),
            config.input_queue.clone(),
            config.one_time_grace,
        );
        tokio::spawn(async move {
            if let Err(e) = ingest.run().await {
                error!(worker, error = %e, "ingest worker exited");
            }
        });

        let dispatch = DispatchWorker::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&push),
            Arc::clone(&profiles),
            Arc::clone(&metrics),
            config.output_queue.clone(),
            config.default_timezone,
        );
        tokio::spawn(async move {
            if let Err(e) = dispatch.run().await {
                error!(worker, error = %e, "dispatch worker exited");
            }
        });
    }

    let state = AppState {
        store,
        bus,
        metrics,
        config: Arc::clone(&config),
    };
    let app = remind_server::api::router(state);

    // Resolve the bind address (CLI overrides take precedence).
    let host = cli.host.unwrap_or_else(|| config.host.clone());
    let port = cli.port.unwrap_or(config.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "remind-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("remind-server shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
