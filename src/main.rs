//! pollencast - weather and pollen data with correlation insights
//!
//! Parses the command line, builds the application, runs one command and
//! prints its result as pretty JSON on stdout. Logs go to stderr.

use std::process;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pollencast::app::App;
use pollencast::cli::{parse_category_arg, parse_location_arg, Cli, Command, StartupConfig};
use pollencast::data::all_locations;
use pollencast::maintenance::MaintenanceMessage;

/// Installs the stderr log subscriber; RUST_LOG overrides the default filter
fn init_tracing(default_filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints a usage error and exits with status 2
fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {}", message);
    process::exit(2);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let startup = StartupConfig::from_cli(&cli).unwrap_or_else(|e| fail(e));
    init_tracing(&startup.log_filter);

    let app = App::with_startup_config(startup).unwrap_or_else(|e| fail(e));

    match cli.command {
        Command::Fetch { category, location } => {
            let category = parse_category_arg(&category).unwrap_or_else(|e| fail(e));
            let location = parse_location_arg(&location).unwrap_or_else(|e| fail(e));
            print_json(&app.fetch(category, location).await)?;
        }
        Command::Correlate { location, limit } => {
            let location = parse_location_arg(&location).unwrap_or_else(|e| fail(e));
            print_json(&app.correlate(location, limit).await)?;
        }
        Command::Warm => {
            print_json(&app.warm().await)?;
        }
        Command::Stats => {
            print_json(&app.stats())?;
        }
        Command::Cleanup => {
            let removed = app.cleanup()?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        Command::Locations => {
            print_json(&all_locations())?;
        }
        Command::Run { cleanup_interval } => {
            if cleanup_interval == 0 {
                fail("--cleanup-interval must be at least 1 second");
            }
            let records = app.warm().await;
            print_json(&records)?;

            let mut maintenance = app.spawn_maintenance(Duration::from_secs(cleanup_interval));
            info!(cleanup_interval, "running until Ctrl-C");

            loop {
                tokio::select! {
                    message = maintenance.receiver.recv() => match message {
                        Some(MaintenanceMessage::CleanupCompleted { removed }) => {
                            info!(removed, "periodic cleanup finished");
                        }
                        Some(MaintenanceMessage::CleanupFailed(error)) => {
                            warn!(%error, "periodic cleanup failed");
                        }
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        info!("shutting down");
                        break;
                    }
                }
            }

            maintenance.shutdown().await;
            print_json(&app.stats())?;
        }
    }

    Ok(())
}
