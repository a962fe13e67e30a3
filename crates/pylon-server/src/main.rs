//! Pylon server binary.
//!
//! `serve` (the default) runs the TURN credential service, the WebSocket
//! signaling hub, and the REST API in one process. `apikey` manages the
//! bearer key used by the protected REST routes.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pylon_core::config::{self, Config};
use pylon_core::tracing_init;

use pylon_server::api::{self, AppState};
use pylon_server::apikey;
use pylon_server::registry::PeerRegistry;
use pylon_server::signaling::SignalingHub;
use pylon_server::storage::ServiceStore;
use pylon_server::tls::TlsMode;
use pylon_server::turn::auth::TurnAuthenticator;
use pylon_server::turn::secrets::SecretRing;
use pylon_server::turn::server::TurnServer;

#[derive(Parser)]
#[command(name = "pylon-server")]
#[command(
    version,
    about = "Self-contained TURN/STUN server with WebRTC signaling and a service catalog"
)]
struct Cli {
    /// Config file path.
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server (default).
    Serve,
    /// Manage API keys.
    Apikey {
        #[command(subcommand)]
        command: ApikeyCommand,
    },
}

#[derive(Subcommand)]
enum ApikeyCommand {
    /// Generate a new API key (creates a default config if needed).
    Generate,
    /// Replace the existing API key. Invalidates the old key.
    Rotate,
    /// Show API key status.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&cli.config).await,
        Command::Apikey { command } => match command {
            ApikeyCommand::Generate => generate_api_key(&cli.config),
            ApikeyCommand::Rotate => rotate_api_key(&cli.config),
            ApikeyCommand::Status => api_key_status(&cli.config),
        },
    }
}

async fn serve(config_path: &Path) -> anyhow::Result<()> {
    let cfg = Config::load(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    tracing_init::init_tracing(
        &tracing_init::default_filter(&cfg.logging.level),
        cfg.logging.format == "json",
    );

    if cfg.api.api_key.hash.is_empty() {
        anyhow::bail!(
            "no API key configured in {path}\n\
             Generate one with:\n    pylon-server apikey generate -c {path}",
            path = config_path.display()
        );
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        domain = %cfg.domain,
        "Starting pylon server"
    );
    info!(created_at = %cfg.api.api_key.created_at, "API key validated");

    // One ring for the whole process: API handlers, signaling hub, and
    // the TURN authenticator all observe rotation through it.
    let secrets = Arc::new(SecretRing::new(
        cfg.turn.auth.secret.clone(),
        cfg.turn.auth.old_secrets.clone(),
        cfg.turn.auth.ttl_seconds,
    ));

    let tls_config = TlsMode::from_cert_dir(&cfg.cert_dir)
        .server_config()
        .context("loading TLS certificates")?;
    if tls_config.is_none() {
        info!(cert_dir = %cfg.cert_dir.display(), "No TLS certificates found, TLS listeners disabled");
    }

    let authenticator = Arc::new(
        TurnAuthenticator::from_config(&cfg.turn.auth, Arc::clone(&secrets))
            .map_err(|e| anyhow::anyhow!("invalid TURN auth configuration: {e}"))?,
    );

    let turn_server = TurnServer::bind(&cfg.turn, authenticator, tls_config)
        .await
        .context("starting TURN listeners")?;

    let db_path = cfg.storage.database_path();
    let store = ServiceStore::open(&db_path)
        .await
        .with_context(|| format!("opening service store {}", db_path.display()))?;
    info!(path = %db_path.display(), "Storage initialized");

    let registry = Arc::new(PeerRegistry::new());
    let hub = Arc::new(SignalingHub::new(
        &cfg.signaling,
        cfg.turn.clone(),
        Arc::clone(&registry),
        store.clone(),
        Arc::clone(&secrets),
    ));
    tokio::spawn(Arc::clone(&hub).run_cleanup());

    let state = AppState {
        hub: Arc::clone(&hub),
        registry,
        store,
        secrets: Arc::clone(&secrets),
        turn: cfg.turn.clone(),
    };
    let router = api::build_router(state, cfg.api.api_key.hash.clone(), &cfg.api.cors_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.api.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding HTTP listener on {addr}"))?;
    info!(%addr, "HTTP server listening (REST API + WebSocket signaling)");

    let http_shutdown = CancellationToken::new();
    let http_task = tokio::spawn({
        let shutdown = http_shutdown.clone();
        async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned());
            if let Err(e) = serve.await {
                error!(error = %e, "HTTP server error");
            }
        }
    });

    info!("Server initialized successfully");

    run_signal_loop(config_path, &secrets).await?;

    info!("Shutting down");
    http_shutdown.cancel();
    hub.shutdown().await;
    turn_server.shutdown();
    let _ = http_task.await;
    info!("Server stopped");

    Ok(())
}

/// Block until SIGINT/SIGTERM. SIGHUP reloads the config file and applies
/// the TURN secrets to the shared ring; a failed reload keeps the old
/// secrets.
async fn run_signal_loop(config_path: &Path, secrets: &Arc<SecretRing>) -> anyhow::Result<()> {
    let mut sighup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt signal");
                return Ok(());
            }
            _ = sigterm.recv() => {
                info!("Received termination signal");
                return Ok(());
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading configuration");
                match Config::load(config_path) {
                    Ok(new_cfg) => {
                        secrets.rotate(
                            new_cfg.turn.auth.secret,
                            new_cfg.turn.auth.old_secrets,
                            new_cfg.turn.auth.ttl_seconds,
                        );
                        info!("Configuration reloaded successfully");
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to reload config, keeping current secrets");
                    }
                }
            }
        }
    }
}

fn generate_api_key(config_path: &Path) -> anyhow::Result<()> {
    if config_path.exists() {
        let cfg = Config::load_unchecked(config_path)?;
        if !cfg.api.api_key.hash.is_empty() {
            anyhow::bail!(
                "an API key is already configured\n\
                 Use 'pylon-server apikey rotate' to replace it."
            );
        }
    } else {
        println!(
            "Config file not found. Creating default config at: {}",
            config_path.display()
        );
        Config::default_template().save(config_path)?;
        println!("Default configuration created.");
        println!();
    }

    let (key, digest) = apikey::generate_with_hash()?;
    config::set_api_key(config_path, &digest, &apikey::created_at())?;

    println!("New API key generated:");
    println!();
    println!("    {key}");
    println!();
    println!("IMPORTANT: Save this key securely. It will not be shown again.");
    println!("API key hash saved to: {}", config_path.display());
    println!();
    println!("The config file permissions have been set to 0600 (owner read/write only).");

    Ok(())
}

fn rotate_api_key(config_path: &Path) -> anyhow::Result<()> {
    let cfg = Config::load_unchecked(config_path)?;
    if cfg.api.api_key.hash.is_empty() {
        anyhow::bail!(
            "no API key is currently configured\n\
             Use 'pylon-server apikey generate' to create one."
        );
    }

    println!("WARNING: This will invalidate the current API key.");
    print!("Are you sure you want to continue? (yes/no): ");
    use std::io::Write;
    std::io::stdout().flush()?;

    let mut response = String::new();
    std::io::stdin().read_line(&mut response)?;
    if response.trim() != "yes" {
        println!("Rotation cancelled.");
        return Ok(());
    }

    let (key, digest) = apikey::generate_with_hash()?;
    config::set_api_key(config_path, &digest, &apikey::created_at())?;

    println!();
    println!("API key rotated successfully:");
    println!();
    println!("    {key}");
    println!();
    println!("IMPORTANT: Save this key securely. It will not be shown again.");
    println!("API key hash saved to: {}", config_path.display());
    println!();
    println!("Remember to update all clients using the old API key.");

    Ok(())
}

fn api_key_status(config_path: &Path) -> anyhow::Result<()> {
    let cfg = Config::load_unchecked(config_path)?;

    if cfg.api.api_key.hash.is_empty() {
        println!("Status: No API key configured");
        println!();
        println!("Generate an API key with:");
        println!("    pylon-server apikey generate -c {}", config_path.display());
    } else {
        println!("Status: API key configured");
        if !cfg.api.api_key.created_at.is_empty() {
            println!("Created: {}", cfg.api.api_key.created_at);
        }
        let prefix: String = cfg.api.api_key.hash.chars().take(20).collect();
        println!("Hash: {prefix}...");
    }

    Ok(())
}
