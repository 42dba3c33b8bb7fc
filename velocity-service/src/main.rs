use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use velocity_core::{Aggregator, BigQueryClient, Config};
use velocity_service::{router, AppState, SharedState};

#[derive(Parser)]
#[command(name = "velocity-service")]
#[command(about = "Serve cached GP velocity metrics", long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long, env = "VELOCITY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides service.port)
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind (overrides service.bind)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::resolve(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.service.port = port;
    }
    if let Some(bind) = args.bind {
        config.service.bind = bind;
    }

    // Credentials and table coordinates are checked here, before serving
    let client = BigQueryClient::from_config(&config)?;
    let state: SharedState = Arc::new(AppState::new(Aggregator::new(Arc::new(client)), &config));

    let addr = format!("{}:{}", config.service.bind, config.service.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        table = %state.table_name(),
        ttl_secs = config.ttl_duration().as_secs(),
        "velocity-service listening"
    );

    axum::serve(listener, router(state)).await?;
    Ok(())
}
