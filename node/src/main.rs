// Copyright (c) 2026 Lumen Labs. MIT License.
// See LICENSE for details.

//! # Lumen Service Node
//!
//! Entry point for the `lumen-node` binary. Parses CLI arguments,
//! initializes logging, opens the spend store, and serves the REST API
//! over the attestation ledger, the allowance service, and the purchase
//! coordinator.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — start the service node
//! - `init`    — initialize data directory and generate a signing key
//! - `version` — print build version information

mod api;
mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::RwLock;

use lumen_protocol::clock::SystemClock;
use lumen_protocol::guardian::AllowanceService;
use lumen_protocol::identity::LumenKeypair;
use lumen_protocol::oracle::AttestationLedger;
use lumen_protocol::purchase::{PurchaseCoordinator, SigningEnvironment};
use lumen_protocol::storage::SpendDb;

use cli::{Commands, LumenNodeCli};
use logging::LogFormat;

/// File inside the data directory holding the hex-encoded signing key.
const SIGNING_KEY_FILE: &str = "service.key";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = LumenNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full service node: store, service stack, and REST API.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "lumen_node=info,lumen_protocol=info,tower_http=debug",
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        fingerprint = lumen_protocol::config::PROTOCOL_FINGERPRINT,
        api_port = args.api_port,
        data_dir = %args.data_dir.display(),
        "starting lumen-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

    let db = SpendDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Signing identity ---
    let keypair = load_signing_key(args.signing_key.as_deref(), &args.data_dir)?;
    tracing::info!(address = %keypair.address(), "signing identity loaded");

    // --- Service stack ---
    let clock = Arc::new(SystemClock);
    let ledger = AttestationLedger::new(db.clone(), clock.clone());
    let allowances = AllowanceService::new(db, clock);
    let environment = Arc::new(SigningEnvironment::new(keypair));
    let coordinator = PurchaseCoordinator::new(ledger.clone(), allowances.clone(), environment);

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            lumen_protocol::config::PROTOCOL_VERSION,
        ),
        services: Arc::new(RwLock::new(api::Services {
            ledger,
            allowances,
            coordinator,
        })),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    tracing::info!("lumen-node stopped");
    Ok(())
}

/// Resolves the node's signing keypair.
///
/// Resolution order: the `--signing-key` flag, then the key file inside
/// the data directory, then a freshly generated ephemeral key. Ephemeral
/// keys produce valid purchase groups but change on every restart, so a
/// warning is logged.
fn load_signing_key(flag: Option<&str>, data_dir: &Path) -> Result<LumenKeypair> {
    if let Some(hex_key) = flag {
        return LumenKeypair::from_hex(hex_key.trim())
            .context("invalid signing key passed via flag or environment");
    }

    let key_path = data_dir.join(SIGNING_KEY_FILE);
    if key_path.exists() {
        let contents = std::fs::read_to_string(&key_path)
            .with_context(|| format!("failed to read signing key at {}", key_path.display()))?;
        return LumenKeypair::from_hex(contents.trim())
            .with_context(|| format!("invalid signing key file at {}", key_path.display()));
    }

    tracing::warn!(
        "no signing key found (run `lumen-node init` to create one); using an ephemeral key"
    );
    Ok(LumenKeypair::generate())
}

/// Initializes a new node data directory and generates a signing keypair.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("lumen_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    // Generate the node's signing keypair.
    let keypair = LumenKeypair::generate();
    let address = keypair.address();

    // Write the secret key to a file inside the data directory.
    let key_path = data_dir.join(SIGNING_KEY_FILE);
    let secret_bytes = keypair.secret_key_bytes();
    std::fs::write(&key_path, hex::encode(secret_bytes))
        .with_context(|| format!("failed to write signing key to {}", key_path.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(
        address = %address,
        key_path = %key_path.display(),
        "signing keypair generated"
    );

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Signing key    : {}", key_path.display());
    println!("  Node address   : {}", address);

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("lumen-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol   {}", lumen_protocol::config::PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
