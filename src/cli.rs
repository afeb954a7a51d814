//! Command-line front-end (SPEC_FULL §B.2), built the way the teacher's
//! own `cli.rs` derives `Parser`/`Subcommand` rather than hand-parsing
//! `std::env::args()`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "boxsync", version, about = "Crash-safe bidirectional IMAP/Maildir mailbox synchronizer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a sync for one or all configured channels
    Sync {
        /// Only sync this channel (default: every channel in the config)
        #[arg(long)]
        channel: Option<String>,

        /// Config file path
        #[arg(long, default_value = "boxsync.toml")]
        config: PathBuf,

        /// Compute decisions and log them, but never mutate a store
        #[arg(long)]
        dry_run: bool,

        /// Emit debug-level tracing
        #[arg(long)]
        verbose: bool,
    },

    /// Print each box pair's state file summary without syncing
    Status {
        /// Only report on this channel (default: every channel in the config)
        #[arg(long)]
        channel: Option<String>,

        /// Config file path
        #[arg(long, default_value = "boxsync.toml")]
        config: PathBuf,
    },
}
