//! Tracing setup and the long-running `run` command.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use redq_config::{Config, ConfigLoader, LoggingConfig};
use redq_queue::{ProcessorConfig, QueueProcessor, RetrySupervisor, SupervisorConfig};

use crate::adapters::{LoggingMessageHandler, build_queue};

/// Initialize tracing with console output and, when `file_dir` is set,
/// daily rolling files.
pub(crate) fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let file_layer = match &logging.file_dir {
        Some(dir) => {
            let log_dir = ConfigLoader::expand_path(&dir.to_string_lossy());
            std::fs::create_dir_all(&log_dir)
                .with_context(|| format!("Failed to create log directory {log_dir}"))?;

            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("redq")
                .filename_suffix("log")
                .max_log_files(30)
                .build(&log_dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Flushes on drop; must outlive the program.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(logging.json.then(|| fmt::layer().json().with_target(true)))
        .with((!logging.json).then(|| fmt::layer().with_target(true).with_ansi(true)))
        .with(file_layer)
        .try_init()?;

    Ok(())
}

/// Run the retry supervisor and a processor that logs every message until
/// Ctrl-C.
pub(crate) async fn run_server(config: Config) -> anyhow::Result<()> {
    info!("Starting redq v{}", env!("CARGO_PKG_VERSION"));

    let handles = build_queue(&config).await?;
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::new();

    if config.supervisor.enabled {
        let supervisor = Arc::new(
            RetrySupervisor::new(
                handles.queue.clone(),
                SupervisorConfig::from_settings(&config.supervisor),
            )
            .with_metrics(handles.metrics.clone()),
        );
        tasks.push(supervisor.spawn(shutdown_tx.subscribe()));
    } else {
        warn!("Retry supervisor disabled: expired messages will not be redelivered by this process");
    }

    let processor = Arc::new(
        QueueProcessor::new(
            handles.queue.clone(),
            ProcessorConfig::from_settings(&config.processor),
        )
        .with_fallback(Arc::new(LoggingMessageHandler)),
    );
    tasks.push(processor.clone().spawn(shutdown_tx.subscribe()));

    info!(queue = %handles.queue.name(), "redq ready, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down...");
    let _ = shutdown_tx.send(());
    for task in tasks {
        task.await?;
    }

    info!(
        processed = processor.processed(),
        failed = processor.failed(),
        "Processor stopped"
    );
    debug!("Final metrics:\n{}", handles.metrics.registry().export());
    Ok(())
}
