use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use history_relay::{
    cli::{Cli, Command, ServeArgs},
    client,
    config::RelayConfig,
    relay::Relay,
};

/// Stdin reads run on a blocking thread that cannot be cancelled, so the
/// runtime is not allowed to wait for them on exit.
const RUNTIME_SHUTDOWN: Duration = Duration::from_millis(100);

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    let result = runtime.block_on(async {
        match cli.command {
            Command::Serve(args) => serve(args).await,
            Command::Client(args) => client::run(args).await,
        }
    });
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN);

    result
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = RelayConfig::from_args(&args);
    info!(
        address = %config.address,
        port = config.port,
        history = config.history_capacity.get(),
        max_connections = config.max_connections,
        "starting relay"
    );

    let listener = TcpListener::bind((config.address.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.address, config.port))?;
    let relay = Relay::new(listener, &config);
    info!("relay listening on {}", relay.local_addr()?);

    if let Err(err) = relay.run_until_ctrl_c().await {
        warn!("relay exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
