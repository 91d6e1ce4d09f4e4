//! redq - durable at-least-once work queue
//!
//! Main entry point for the redq CLI and worker.

mod adapters;
mod cli;
mod cmd_queue;
mod server;

use clap::Parser;

use redq_config::LoggingConfig;

use crate::adapters::load_config;
use crate::cli::{Cli, Commands};
use crate::cmd_queue::{
    check_config, queue_clear, queue_dead, queue_push, queue_reschedule, queue_retry, queue_state,
};
use crate::server::{init_tracing, run_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::CheckConfig) = cli.command {
        init_tracing(&LoggingConfig::default())?;
        return check_config(&cli.config);
    }

    let config = load_config(&cli.config)?;
    init_tracing(&config.logging)?;

    match cli.command {
        None | Some(Commands::Run) => run_server(config).await,
        Some(Commands::Push {
            kind,
            payload,
            delay_ms,
            ensure,
            max_attempts,
        }) => queue_push(&config, &kind, &payload, delay_ms, ensure, max_attempts).await,
        Some(Commands::Reschedule {
            kind,
            payload,
            delay_ms,
        }) => queue_reschedule(&config, &kind, &payload, delay_ms).await,
        Some(Commands::State) => queue_state(&config).await,
        Some(Commands::Retry) => queue_retry(&config).await,
        Some(Commands::Clear { yes }) => queue_clear(&config, yes).await,
        Some(Commands::Dead { limit, format }) => queue_dead(&config, limit, &format).await,
        Some(Commands::CheckConfig) => check_config(&cli.config),
    }
}
