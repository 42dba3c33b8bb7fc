//! Velocity CLI - GP velocity metrics from the terminal

mod client;
mod display;

use clap::{Parser, Subcommand};
use client::{Envelope, ServiceClient};
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;
use velocity_core::{Aggregator, BigQueryClient, Config, VelocityError, VelocityMetrics};

#[derive(Parser)]
#[command(name = "velocity")]
#[command(about = "GP velocity metrics", long_about = None)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch metrics from a running velocity-service
    Fetch {
        /// Service URL
        #[arg(long, env = "VELOCITY_SERVICE_URL", default_value = "http://127.0.0.1:3000")]
        url: String,

        /// Bypass the service cache
        #[arg(long)]
        refresh: bool,

        /// Return per-company records instead of the summary
        #[arg(long)]
        raw: bool,
    },

    /// Query the warehouse directly, without the service
    Query {
        /// TOML config file
        #[arg(long, env = "VELOCITY_CONFIG")]
        config: Option<PathBuf>,

        /// Return per-company records instead of the summary
        #[arg(long)]
        raw: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Fetch { url, refresh, raw } => cmd_fetch(&url, refresh, raw, cli.json),
        Commands::Query { config, raw } => cmd_query(config, raw, cli.json),
    };

    if let Err(e) = result {
        if cli.json {
            let error_json = match &e {
                VelocityError::Service { status, message } => {
                    serde_json::json!({ "status": status, "message": message })
                }
                _ => serde_json::json!({ "message": e.to_string() }),
            };
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&error_json).unwrap_or_else(|_| e.to_string())
            );
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> velocity_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn missing_data() -> VelocityError {
    VelocityError::Service {
        status: 200,
        message: "response carried no data".to_string(),
    }
}

fn cmd_fetch(url: &str, refresh: bool, raw: bool, json: bool) -> velocity_core::Result<()> {
    let client = ServiceClient::new(url);

    if raw {
        let envelope = client.raw()?;
        let records = envelope.data.ok_or_else(missing_data)?;
        if json {
            return print_json(&records);
        }
        display::print_records(&records, envelope.count.unwrap_or(records.len()));
        return Ok(());
    }

    let envelope = client.metrics(refresh)?;
    if json {
        let metrics = envelope.data.as_ref().ok_or_else(missing_data)?;
        return print_json(metrics);
    }
    print_annotations(&envelope);
    let metrics = envelope.data.ok_or_else(missing_data)?;
    display::print_metrics(&metrics, OffsetDateTime::now_utc());
    Ok(())
}

fn print_annotations(envelope: &Envelope<VelocityMetrics>) {
    use colored::Colorize;

    let age = envelope.cache_age.unwrap_or(0);
    if envelope.stale == Some(true) {
        println!(
            "{} serving cached data from {}s ago: {}",
            "Stale".red(),
            age,
            envelope.error.as_deref().unwrap_or("refresh failed")
        );
    } else if envelope.cached == Some(true) {
        println!("{} {}s ago", "Cached".yellow(), age);
    }
}

fn cmd_query(config: Option<PathBuf>, raw: bool, json: bool) -> velocity_core::Result<()> {
    let config = Config::resolve(config.as_deref())?;
    let aggregator = Aggregator::new(Arc::new(BigQueryClient::from_config(&config)?));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    if raw {
        let records = runtime.block_on(aggregator.query_velocity_data())?;
        if json {
            return print_json(&records);
        }
        display::print_records(&records, records.len());
        return Ok(());
    }

    let metrics = runtime.block_on(aggregator.get_velocity_metrics())?;
    if json {
        return print_json(&metrics);
    }
    display::print_metrics(&metrics, OffsetDateTime::now_utc());
    Ok(())
}
