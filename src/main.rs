use std::path::PathBuf;

use clap::Parser;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratewarden::config::Settings;
use ratewarden::driver;
use ratewarden::ratelimit::RateLimitService;

/// Read keys from stdin, one per line, and print a JSON rate limit decision
/// for each.
#[derive(Parser, Debug)]
#[command(name = "ratewarden", version, about)]
struct Args {
    /// Settings file (YAML, TOML or JSON). RATEWARDEN_* environment variables
    /// override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries decisions.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting ratewarden");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load(args.config.as_deref())?.resolve()?;
    info!(algorithm = %settings.algorithm.algorithm(), "Configuration loaded");

    let service = RateLimitService::from_settings(&settings)?;

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        result = driver::run(&service, stdin, stdout) => {
            let decisions = result?;
            info!(decisions = decisions, "Input closed");
        }
        received = shutdown_signal() => {
            info!(signal = received, "Closing stdin before all input was read");
        }
    }

    service.close();
    info!("ratewarden stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM and return which one arrived.
///
/// A handler that cannot be installed never fires, so the session then runs
/// until stdin reaches EOF.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
