//! Wiring between configuration and the queue crate.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use redq_config::{Config, ConfigLoader, ConfigValidator, StoreBackend};
use redq_queue::{
    FanoutPublisher, LoggingDeadMessageHandler, MemoryStore, Message, MessageHandler,
    MessageQueue, MetricsPublisher, MetricsRegistry, QueueConfig, QueueError, QueueStore,
    RedisStore, StoreDeadMessageHandler, TracingPublisher,
};

/// Get the ~/.redq directory path.
pub(crate) fn redq_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".redq"))
        .unwrap_or_else(|| PathBuf::from(".redq"))
}

/// Resolve the configuration file: the given path if it exists, else
/// `~/.redq/redq.toml` if that exists, else the given path (defaults).
pub(crate) fn resolve_config_path(path: &Path) -> PathBuf {
    if path.exists() {
        return path.to_path_buf();
    }
    let fallback = redq_dir().join("redq.toml");
    if fallback.exists() {
        fallback
    } else {
        path.to_path_buf()
    }
}

/// Load and validate configuration. A missing file yields defaults.
pub(crate) fn load_config(path: &Path) -> anyhow::Result<Config> {
    let path = resolve_config_path(path);
    let config = ConfigLoader::load_or_default(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    ConfigValidator::validate(&config).into_result()?;
    Ok(config)
}

/// Everything a command needs to talk to the queue.
pub(crate) struct QueueHandles {
    pub queue: MessageQueue,
    pub metrics: Arc<MetricsPublisher>,
    pub dead_letters: Option<Arc<StoreDeadMessageHandler>>,
}

/// Connect the configured store and build the queue.
pub(crate) async fn build_queue(config: &Config) -> anyhow::Result<QueueHandles> {
    let store: Arc<dyn QueueStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Redis => {
            let timeout = Duration::from_millis(config.store.connect_timeout_ms);
            let store = RedisStore::connect(&config.store.redis_url, timeout)
                .await
                .context("Failed to connect to Redis")?;
            Arc::new(store)
        }
    };

    let metrics = Arc::new(MetricsPublisher::new(Arc::new(MetricsRegistry::new())));
    let publisher = FanoutPublisher::new()
        .with(Arc::new(TracingPublisher))
        .with(metrics.clone());

    let mut builder = MessageQueue::builder(store)
        .config(QueueConfig::from_settings(&config.queue))
        .publisher(Arc::new(publisher))
        .dead_message_handler(Arc::new(LoggingDeadMessageHandler));

    let dead_letters = if config.dead_letter.enabled {
        let handler = Arc::new(StoreDeadMessageHandler::new(config.dead_letter_name()));
        builder = builder.dead_message_handler(handler.clone());
        Some(handler)
    } else {
        None
    };

    let queue = builder.build()?;
    info!(
        queue = %queue.name(),
        backend = ?config.store.backend,
        dead_letters = ?dead_letters.as_ref().map(|d| d.dead_letter_name()),
        "Queue connected"
    );

    Ok(QueueHandles {
        queue,
        metrics,
        dead_letters,
    })
}

/// Parse a message from CLI arguments.
pub(crate) fn parse_message(kind: &str, payload: &str) -> anyhow::Result<Message> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Payload is not valid JSON")?;
    Ok(Message::new(kind, payload))
}

/// Handles every kind by logging the message and acknowledging it.
pub(crate) struct LoggingMessageHandler;

#[async_trait]
impl MessageHandler for LoggingMessageHandler {
    fn kind(&self) -> &str {
        "*"
    }

    async fn handle(&self, message: &Message) -> Result<(), QueueError> {
        info!(
            kind = %message.kind,
            attempts = message.attempts(),
            payload = %message.payload,
            "Received message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message() {
        let message = parse_message("bake", r#"{"version":"v1"}"#).unwrap();
        assert_eq!(message.kind, "bake");
        assert_eq!(message.payload["version"], "v1");
        assert!(parse_message("bake", "{oops").is_err());
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/redq.toml")).unwrap();
        assert_eq!(config.queue.name, "redq");
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[tokio::test]
    async fn test_build_memory_queue() {
        let handles = build_queue(&Config::default()).await.unwrap();
        assert_eq!(handles.queue.name(), "redq");
        assert_eq!(
            handles.dead_letters.as_ref().map(|d| d.dead_letter_name()),
            Some("redq.dlq")
        );

        handles
            .queue
            .push(&parse_message("bake", "{}").unwrap(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(handles.metrics.registry().get_counter("redq_pushed_total"), Some(1));
    }
}
