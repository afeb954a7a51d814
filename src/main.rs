use clap::Parser;
use tracing_subscriber::EnvFilter;

use boxsync::cli::{Cli, Commands};
use boxsync::error::SyncError;

/// Spec §6.4's exit codes. The 100 "step limit" code is reserved for the
/// replay test harness's own instrumentation (spec §8); nothing in this
/// CLI emits it, since reaching it requires per-driver-call step
/// counting the harness installs around a `MockDriver`, not something
/// the production binary needs to reproduce.
const EXIT_OK: i32 = 0;
const EXIT_SYNC_FAILURE: i32 = 1;
const EXIT_CRASHED: i32 = 3;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Sync { channel, config, dry_run, verbose } => {
            init_tracing(verbose);
            run_sync(&config, channel.as_deref(), dry_run)
        }
        Commands::Status { channel, config } => {
            init_tracing(false);
            run_status(&config, channel.as_deref())
        }
    };
    std::process::exit(code);
}

fn load_config_or_exit(path: &std::path::Path) -> Option<boxsync::config::RootConfig> {
    match boxsync::config::load(path) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            eprintln!("config defect: {e:#}");
            None
        }
    }
}

fn run_sync(config_path: &std::path::Path, channel: Option<&str>, dry_run: bool) -> i32 {
    let Some(cfg) = load_config_or_exit(config_path) else {
        return EXIT_CRASHED;
    };

    let names: Vec<String> = match channel {
        Some(c) => vec![c.to_string()],
        None => cfg.channels.keys().cloned().collect(),
    };
    if names.is_empty() {
        eprintln!("no channels configured");
        return EXIT_CRASHED;
    }

    let mut any_failed = false;
    for name in &names {
        match boxsync::runner::run_channel(&cfg, name, dry_run) {
            Ok(run) => {
                for pair in &run.pairs {
                    match &pair.outcome {
                        Ok(_) => tracing::info!(channel = %name, far_box = %pair.far_box, near_box = %pair.near_box, "pair synced"),
                        Err(e) => {
                            any_failed = true;
                            tracing::error!(channel = %name, far_box = %pair.far_box, near_box = %pair.near_box, error = %e, "pair failed");
                        }
                    }
                }
            }
            Err(e) => {
                any_failed = true;
                match &e {
                    SyncError::ConfigDefect(_) | SyncError::EnvironmentDefect(_) => {
                        tracing::error!(channel = %name, error = %e, "channel aborted");
                        return EXIT_CRASHED;
                    }
                    _ => tracing::error!(channel = %name, error = %e, "channel failed"),
                }
            }
        }
    }

    if any_failed { EXIT_SYNC_FAILURE } else { EXIT_OK }
}

fn run_status(config_path: &std::path::Path, channel: Option<&str>) -> i32 {
    let Some(cfg) = load_config_or_exit(config_path) else {
        return EXIT_CRASHED;
    };
    let names: Vec<String> = match channel {
        Some(c) => vec![c.to_string()],
        None => cfg.channels.keys().cloned().collect(),
    };

    for name in &names {
        match boxsync::runner::status(&cfg, name) {
            Ok(pairs) => {
                println!("channel {name}:");
                if pairs.is_empty() {
                    println!("  (no state files yet)");
                }
                for p in pairs {
                    println!(
                        "  {}{}: paired={} pending={} expiring={} expired={}",
                        p.box_name,
                        if p.locked { " [locked]" } else { "" },
                        p.paired,
                        p.pending,
                        p.expiring,
                        p.expired
                    );
                }
            }
            Err(e) => {
                eprintln!("channel {name}: {e}");
                return EXIT_CRASHED;
            }
        }
    }
    EXIT_OK
}
