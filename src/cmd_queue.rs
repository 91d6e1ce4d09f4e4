//! One-shot queue subcommands.

use std::path::Path;
use std::time::Duration;

use anyhow::bail;
use tracing::{info, warn};

use redq_config::{Config, ConfigLoader, ConfigValidator};

use crate::adapters::{build_queue, parse_message, resolve_config_path};

/// Enqueue a message.
pub(crate) async fn queue_push(
    config: &Config,
    kind: &str,
    payload: &str,
    delay_ms: u64,
    ensure: bool,
    max_attempts: Option<u32>,
) -> anyhow::Result<()> {
    let mut message = parse_message(kind, payload)?;
    if let Some(max_attempts) = max_attempts {
        message = message.with_max_attempts(max_attempts);
    }

    let handles = build_queue(config).await?;
    let delay = Duration::from_millis(delay_ms);

    if ensure {
        if handles.queue.ensure(&message, delay).await? {
            println!("Pushed.");
        } else {
            println!("Already queued or in flight, not pushed.");
        }
    } else {
        handles.queue.push(&message, delay).await?;
        println!("Pushed.");
    }
    Ok(())
}

/// Move a waiting message's delivery time.
pub(crate) async fn queue_reschedule(
    config: &Config,
    kind: &str,
    payload: &str,
    delay_ms: u64,
) -> anyhow::Result<()> {
    let message = parse_message(kind, payload)?;
    let handles = build_queue(config).await?;

    if handles
        .queue
        .reschedule(&message, Duration::from_millis(delay_ms))
        .await?
    {
        println!("Rescheduled.");
    } else {
        println!("Message is not waiting in the queue.");
    }
    Ok(())
}

/// Print queue sizes.
pub(crate) async fn queue_state(config: &Config) -> anyhow::Result<()> {
    let handles = build_queue(config).await?;
    let state = handles.queue.read_state().await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

/// Run one retry sweep.
pub(crate) async fn queue_retry(config: &Config) -> anyhow::Result<()> {
    let handles = build_queue(config).await?;
    let summary = handles.queue.retry().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Drop every message.
pub(crate) async fn queue_clear(config: &Config, yes: bool) -> anyhow::Result<()> {
    if !yes {
        bail!("Refusing to clear queue '{}' without --yes", config.queue.name);
    }
    let handles = build_queue(config).await?;
    handles.queue.clear().await?;
    println!("Cleared queue '{}'.", handles.queue.name());
    Ok(())
}

/// List dead-lettered messages.
pub(crate) async fn queue_dead(
    config: &Config,
    limit: Option<usize>,
    format: &str,
) -> anyhow::Result<()> {
    let handles = build_queue(config).await?;
    let Some(dead_letters) = handles.dead_letters else {
        bail!("Dead letter store is disabled in the configuration");
    };

    let letters = dead_letters.list(&handles.queue, limit).await?;
    if letters.is_empty() {
        println!("No dead messages.");
        return Ok(());
    }

    match format {
        "json" => {
            let entries: Vec<_> = letters
                .iter()
                .map(|l| {
                    serde_json::json!({
                        "fingerprint": l.fingerprint,
                        "died_at": l.died_at,
                        "message": l.message,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            println!("{:<16} {:<16} {:<8} {}", "FINGERPRINT", "KIND", "ATTEMPTS", "PAYLOAD");
            println!("{}", "-".repeat(80));
            for letter in letters {
                println!(
                    "{:<16} {:<16} {:<8} {}",
                    &letter.fingerprint[..letter.fingerprint.len().min(12)],
                    letter.message.kind,
                    letter.message.attempts(),
                    letter.message.payload
                );
            }
        }
    }
    Ok(())
}

/// Load and validate the configuration file, printing every finding.
pub(crate) fn check_config(path: &Path) -> anyhow::Result<()> {
    let path = resolve_config_path(path);
    let config = ConfigLoader::load_or_default(&path)?;
    if !path.exists() {
        warn!("{} not found, checking defaults", path.display());
    }

    let result = ConfigValidator::validate(&config);
    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        println!("error: {}: {}", error.path, error.message);
    }

    if !result.is_valid() {
        bail!("{} error(s) in {}", result.errors.len(), path.display());
    }
    info!(queue = %config.queue.name, backend = ?config.store.backend, "Configuration valid");
    println!("Configuration OK.");
    Ok(())
}
