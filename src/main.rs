use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pulsewatch::alerting::AnalyticsService;
use pulsewatch::config::EngineConfig;
use pulsewatch::db::tasks::RetentionTask;
use pulsewatch::db::{PgStore, Store};
use pulsewatch::monitoring::{PeriodicTimer, ProbeScheduler, Prober, TransitionManager};
use pulsewatch::notifications::NotificationService;
use pulsewatch::services::encryption_service::HeaderCipher;
use pulsewatch::version::VERSION;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "pulsewatch.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = EngineConfig::load(args.config.as_deref())?;
    init_logging(&config.log_dir);
    info!(version = VERSION, "Starting pulsewatch.");

    let cipher = match HeaderCipher::from_hex_key(&config.header_encryption_key) {
        Ok(cipher) => Arc::new(cipher),
        Err(e) => {
            error!(error = %e, "Invalid header encryption key.");
            return Err(e.into());
        }
    };

    // --- Store Setup ---
    let connected = PgStore::connect(&config.database_url, config.database_max_connections).await;
    let pg_store = match connected {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Failed to initialise the store.");
            return Err(e.into());
        }
    };
    let store: Arc<dyn Store> = pg_store.clone();
    store.health_check().await?;

    // --- Engine Setup ---
    let notifier = Arc::new(NotificationService::with_timeout(
        config.notification_channels.clone(),
        config.notification_timeout(),
    ));
    info!(channels = notifier.channel_count(), "Notification service ready.");
    // Channels are tried one after another.
    let notify_timeout = config.notification_timeout() * notifier.channel_count().max(1) as u32;

    let prober = Prober::new(cipher)?;
    let transitions = Arc::new(
        TransitionManager::new(store.clone(), notifier).with_notify_timeout(notify_timeout),
    );
    let scheduler = Arc::new(ProbeScheduler::new(
        store.clone(),
        prober,
        transitions,
        config.max_concurrent_probes,
    ));
    let analytics = Arc::new(AnalyticsService::new(
        store.clone(),
        config.analytics_settings(),
    ));
    let retention = Arc::new(RetentionTask::new(store.clone(), config.retention_days));

    // --- Periodic Drivers ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let probe_handle = tokio::spawn(
        PeriodicTimer::new("probe", config.probe_interval())
            .allow_overlap(true)
            .run(shutdown_rx.clone(), move || {
                let scheduler = scheduler.clone();
                async move {
                    if let Err(e) = scheduler.run_probe_cycle().await {
                        error!(error = %e, "Failed to load due targets. Skipping this tick.");
                    }
                }
            }),
    );

    let analytics_handle = tokio::spawn(
        PeriodicTimer::new("analytics", config.analytics_interval()).run(
            shutdown_rx.clone(),
            move || {
                let analytics = analytics.clone();
                async move {
                    if let Err(e) = analytics.run_analytics_cycle().await {
                        error!(error = %e, "Error during analytics cycle.");
                    }
                }
            },
        ),
    );

    let retention_handle = tokio::spawn(
        PeriodicTimer::new("retention", config.prune_interval()).run(shutdown_rx, move || {
            let retention = retention.clone();
            async move {
                if let Err(e) = retention.run_once(chrono::Utc::now()).await {
                    error!(error = %e, "Error pruning expired pings.");
                }
            }
        }),
    );

    info!(
        probe_interval_secs = config.probe_interval_secs,
        analytics_interval_secs = config.analytics_interval_secs,
        prune_interval_secs = config.prune_interval_secs,
        "Monitoring engine started."
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping periodic tasks...");
    let _ = shutdown_tx.send(true);

    for (name, handle) in [
        ("probe", probe_handle),
        ("analytics", analytics_handle),
        ("retention", retention_handle),
    ] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Periodic task ended abnormally.");
        }
    }

    if let Err(e) = pg_store.close().await {
        warn!(error = %e, "Failed to close the database connection cleanly.");
    }
    info!("Shutdown complete.");
    Ok(())
}
