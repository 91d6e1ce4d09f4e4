//! CLI definitions for redq.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// redq CLI.
#[derive(Parser)]
#[command(name = "redq")]
#[command(about = "Durable at-least-once work queue")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/redq.toml", global = true, env = "REDQ_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the retry supervisor and a logging processor until Ctrl-C (default)
    Run,

    /// Enqueue a message
    Push {
        /// Message kind
        #[arg(short, long)]
        kind: String,

        /// Payload as JSON
        #[arg(short, long)]
        payload: String,

        /// Delay before the message becomes due
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,

        /// Only push if the message is neither waiting nor in flight
        #[arg(long)]
        ensure: bool,

        /// Per-message attempt ceiling
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Move a waiting message's delivery time
    Reschedule {
        /// Message kind
        #[arg(short, long)]
        kind: String,

        /// Payload as JSON
        #[arg(short, long)]
        payload: String,

        /// New delay from now
        #[arg(long)]
        delay_ms: u64,
    },

    /// Print queue sizes as JSON
    State,

    /// Run one retry sweep
    Retry,

    /// Drop every message, waiting or in flight
    Clear {
        /// Skip the confirmation guard
        #[arg(long)]
        yes: bool,
    },

    /// List dead-lettered messages
    Dead {
        /// Maximum number of entries to show
        #[arg(long)]
        limit: Option<usize>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Load and validate the configuration
    CheckConfig,
}
