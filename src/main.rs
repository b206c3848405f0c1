// rsvpd - RSVP backend daemon
//
// Serves the guest submission API and runs the background confirmation
// delivery engine.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use rsvp_server::audit::AuditLog;
use rsvp_server::auth::{AdminAuth, TokenValidator};
use rsvp_server::config::AppConfig;
use rsvp_server::guard::AttemptGuard;
use rsvp_server::metrics;
use rsvp_server::notify::{
    DeliveryEngine, HttpProvider, LogProvider, NotificationProvider, SendWindows,
};
use rsvp_server::rsvp::SubmissionPipeline;
use rsvp_server::server::{self, AppState};
use rsvp_server::store::MemoryStore;

/// RSVP backend daemon
#[derive(Parser, Debug)]
#[command(name = "rsvpd")]
#[command(version = "0.1.0")]
#[command(about = "Token-gated RSVP backend with a rate-limited confirmation queue", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server and delivery engine (default)
    Serve,
    /// Parse the configuration and print the effective settings
    CheckConfig,
    /// Print the SHA-256 digest of an admin password for the config file
    HashPassword {
        /// Password to digest
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(filter.into())
                .from_env_lossy(),
        )
        .init();

    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::CheckConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
        Commands::HashPassword { password } => {
            println!("{}", hex::encode(Sha256::digest(password.as_bytes())));
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    info!("rsvpd v0.1.0 starting...");
    metrics::init().context("Failed to initialize metrics")?;

    // The relational store is a deployment concern; the in-memory store
    // backs dev setups until the real backend is wired at this seam.
    let store = MemoryStore::new();

    let provider: Arc<dyn NotificationProvider> = match &config.delivery.provider_url {
        Some(url) => {
            info!("Using HTTP delivery provider at {}", url);
            Arc::new(HttpProvider::new(url, config.delivery.provider_timeout()))
        }
        None => {
            info!("No delivery provider configured; sends are logged only");
            Arc::new(LogProvider)
        }
    };

    let engine = Arc::new(DeliveryEngine::new(
        config.delivery.clone(),
        SendWindows::new(&config.limits),
        provider,
        Arc::new(store.clone()),
    ));
    let drainer = Arc::clone(&engine).spawn_drainer();

    let validator = TokenValidator::new(
        AttemptGuard::new(config.token_guard.clone()),
        Arc::new(store.clone()),
    );
    let pipeline = SubmissionPipeline::new(
        validator,
        Arc::new(store),
        Arc::clone(&engine),
        AuditLog::new(),
    );
    let admin = AdminAuth::new(
        AttemptGuard::new(config.admin_guard.clone()),
        config.admin.clone(),
    );

    let state = AppState {
        pipeline,
        admin,
        engine,
    };

    let result = server::serve(&config.server, state).await;
    drainer.abort();
    result
}
