use caseroute::config::RouterConfig;
use caseroute::{cli, connect, log, prometheus, Args, Clock, Router, Sweeper};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match RouterConfig::load(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration Error: {}", err);
            std::process::exit(exitcode::CONFIG);
        }
    };

    log::init(config.log.clone());

    match cli::run(&args, &config).await {
        Ok(true) => std::process::exit(exitcode::OK),
        Ok(false) => {}
        Err(err) => {
            error!(msg = "Command failed", error = err.to_string());
            std::process::exit(exitcode::SOFTWARE);
        }
    }

    let router = init(&config).await;

    if !config.sweeper.enabled {
        warn!(msg = "Expiry sweeper is disabled, nothing to run");
        std::process::exit(exitcode::OK);
    }

    let token = CancellationToken::new();
    let sweeper = Sweeper::init(&config, router, token.clone());

    tokio::select! {
        _ = sigint() => {
            info!(msg = "Received SIGINT");
        },
        _ = sigterm() => {
            info!(msg = "Received SIGTERM");
        },
    }

    info!(msg = "Shutting down case router");
    token.cancel();

    if let Err(err) = sweeper.await {
        warn!(msg = "Sweeper did not stop cleanly", error = err.to_string());
    }
}

///
/// Validate the configuration, start the exporter and load the role map
///
async fn init(config: &RouterConfig) -> Router {
    if !config.database.with_tls_verification {
        warn!(
            msg = "Bypassing Transport Layer Security (TLS) verification for database connections"
        );
    }

    if config.prometheus_enabled() {
        if let Err(err) = prometheus::start("0.0.0.0".to_string(), config.prometheus.port) {
            error!(
                msg = "Could not start case router",
                error = err.to_string()
            );
            std::process::exit(exitcode::CONFIG);
        }
    }

    let client = match connect::database_with_retry(config).await {
        Ok(client) => client,
        Err(err) => {
            error!(
                msg = "Could not start case router",
                error = err.to_string()
            );
            std::process::exit(exitcode::UNAVAILABLE);
        }
    };

    match Router::init(&client, Clock::System, config.claim.clone()).await {
        Ok(router) => {
            info!(
                msg = "Database connected",
                database = config.database.name,
                host = config.database.host,
                port = config.database.port,
            );
            router
        }
        Err(err) => {
            error!(
                msg = "Could not load role types",
                error = err.to_string()
            );
            std::process::exit(exitcode::UNAVAILABLE);
        }
    }
}

async fn sigint() -> std::io::Result<()> {
    signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}

async fn sigterm() -> std::io::Result<()> {
    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}
