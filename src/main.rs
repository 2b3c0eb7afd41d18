use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::ratelimit::{
    Decision, Evictor, FileOverrideStore, NoOverrides, OverrideStore, Registry,
};

#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about = "Per-tenant admission control")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run admission checks for one key and print the resulting headers
    Check {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        credential: String,
        /// Treat the requests as authentication-endpoint traffic
        #[arg(long)]
        auth: bool,
        /// Number of requests to issue
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Read `tenant credential [auth]` lines from stdin and print one JSON
    /// decision per line
    Replay,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TollgateConfig::load(cli.config.as_deref()).context("loading configuration")?;
    info!(
        per_minute = config.limits.requests_per_minute,
        per_hour = config.limits.requests_per_hour,
        auth_per_minute = config.limits.auth_requests_per_minute,
        "Configuration loaded"
    );

    let store: Arc<dyn OverrideStore> = match &config.overrides.path {
        Some(path) => {
            info!(path = %path, "Using file override store");
            Arc::new(FileOverrideStore::new(path))
        }
        None => Arc::new(NoOverrides),
    };
    let registry = Arc::new(Registry::new(&config, store));

    match cli.command {
        Command::Check {
            tenant,
            credential,
            auth,
            count,
        } => {
            for _ in 0..count {
                let decision = registry.check_rate_limit(&tenant, &credential, auth).await;
                print_decision(&decision)?;
            }
        }
        Command::Replay => {
            let evictor = Evictor::new(registry.clone()).spawn();

            tokio::select! {
                result = replay(&registry) => result?,
                _ = shutdown_signal() => {}
            }

            evictor.shutdown().await;
        }
    }

    info!("Tollgate stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_decision(decision: &Decision) -> anyhow::Result<()> {
    let status = decision.rejection_status().unwrap_or(200);
    println!("HTTP {}", status);
    for (name, value) in decision.headers() {
        println!("{}: {}", name, value);
    }
    if let Some(body) = decision.error_body() {
        println!("{}", serde_json::to_string(&body)?);
    }
    println!();
    Ok(())
}

async fn replay(registry: &Registry) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let mut fields = line.split_whitespace();
        let (Some(tenant), Some(credential)) = (fields.next(), fields.next()) else {
            if !line.trim().is_empty() {
                warn!(line = %line, "Skipping malformed replay line");
            }
            continue;
        };
        let auth = matches!(fields.next(), Some("auth"));

        let decision = registry.check_rate_limit(tenant, credential, auth).await;
        println!("{}", serde_json::to_string(&decision)?);
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
