// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # ProxPay Device Agent
//!
//! Entry point for the `proxpay-node` binary. Parses CLI arguments,
//! initializes logging, and runs one of four subcommands:
//!
//! - `run`     — host the trigger gate, read proximity events from stdin
//! - `token`   — establish a session and print one payment token
//! - `verify`  — check a merchant-presented code
//! - `version` — print build version information

mod agent;
mod cli;
mod logging;
mod render;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use proxpay_protocol::gate::{BeaconMeta, TriggerGate, TrustedNetworks};
use proxpay_protocol::session::{
    DeviceIdentity, HttpKeyApi, SessionConfig, SessionKeyManager, SledSessionStore,
};
use proxpay_protocol::token::{build_token, verify_token};
use proxpay_protocol::whitelist::Whitelist;

use agent::{Agent, LoggingSink};
use cli::{Commands, ProxPayCli, SessionArgs};

/// Sled directory under the data dir.
const SESSION_DB_DIR: &str = "session";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ProxPayCli::parse();
    logging::init_logging(logging::DEFAULT_FILTER, cli.log_format());

    match cli.command {
        Commands::Run(args) => run_agent(args).await,
        Commands::Token(args) => print_token(args).await,
        Commands::Verify(args) => verify_code(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn session_manager(args: &SessionArgs) -> Result<SessionKeyManager> {
    std::fs::create_dir_all(&args.data_dir).with_context(|| {
        format!("failed to create data directory: {}", args.data_dir.display())
    })?;

    let db_path = args.data_dir.join(SESSION_DB_DIR);
    let store = SledSessionStore::open(&db_path)
        .with_context(|| format!("failed to open session store at {}", db_path.display()))?;
    let api = HttpKeyApi::new(args.key_server.as_str()).context("failed to build key server client")?;

    let identity = DeviceIdentity {
        device_id: args.device_id.clone(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    Ok(SessionKeyManager::new(
        Arc::new(api),
        Arc::new(store),
        identity,
        SessionConfig::default(),
    ))
}

fn load_whitelist(path: &std::path::Path) -> Result<Whitelist> {
    let whitelist = Whitelist::load(path)
        .with_context(|| format!("failed to load whitelist from {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        beacons = whitelist.len(),
        merchants = whitelist.merchant_count(),
        "whitelist loaded"
    );
    Ok(whitelist)
}

/// Hosts the gate and reads events until stdin closes or a shutdown signal.
async fn run_agent(args: cli::RunArgs) -> Result<()> {
    let whitelist = Arc::new(load_whitelist(&args.whitelist)?);
    let manager = Arc::new(session_manager(&args.session)?);
    let networks = TrustedNetworks::new(&args.trusted_ssids, &args.trusted_bssids);
    if networks.is_empty() {
        tracing::debug!("no trusted networks configured");
    }

    let gate = Arc::new(
        TriggerGate::new(args.gate_config(), whitelist.clone(), Arc::new(LoggingSink::default()))
            .context("failed to start trigger gate")?,
    );

    let prompt_loop = tokio::spawn(agent::serve_prompts(
        gate.subscribe(),
        gate.clone(),
        manager,
        args.merchant_id.clone(),
        args.no_qr,
    ));

    let agent = Agent::new(gate.clone(), whitelist, networks);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!(
        key_server = %args.session.key_server,
        policy = ?args.policy,
        "proxpay-node running, reading events from stdin"
    );

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) => {
                        if let Some(output) = agent.handle_line(&line) {
                            println!("{output}");
                        }
                    }
                    None => {
                        tracing::info!("stdin closed");
                        break;
                    }
                }
            }
            _ = shutdown_signal() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    gate.shutdown();
    prompt_loop.abort();
    tracing::info!("proxpay-node stopped");
    Ok(())
}

async fn print_token(args: cli::TokenArgs) -> Result<()> {
    let manager = session_manager(&args.session)?;

    let token = if args.server_issued {
        let issued = manager
            .issue_server_token()
            .await
            .context("server token issuance failed")?;
        issued.token
    } else {
        let session = manager
            .ensure_session()
            .await
            .context("could not establish a session with the key server")?;
        let extra: BTreeMap<String, String> = args.extra.into_iter().collect();
        build_token(
            session.key_id(),
            session.enc_key(),
            &uuid::Uuid::new_v4().to_string(),
            &args.merchant_id,
            args.amount,
            &extra,
        )
        .context("failed to build token")?
    };

    render::print_token(&token, args.no_qr)
}

/// Proximity context described on the command line.
fn beacon_context(args: &cli::VerifyArgs, whitelist: &Whitelist) -> Option<BeaconMeta> {
    let uuid = args.beacon_uuid.as_deref()?;
    let (major, minor) = (args.major?, args.minor?);
    let entry = whitelist.find_beacon(uuid, major, minor);
    if entry.is_none() {
        tracing::warn!(region = uuid, major, minor, "beacon is not whitelisted");
    }
    Some(BeaconMeta {
        region_id: uuid.to_string(),
        major,
        minor,
        location_id: entry.and_then(|e| e.location_id.clone()),
        merchant_id: entry.and_then(|e| e.merchant_id.clone()),
        nonce: args.nonce.clone(),
        rssi: 0,
    })
}

fn verify_code(args: cli::VerifyArgs) -> Result<()> {
    let whitelist = load_whitelist(&args.whitelist)?;
    let beacon = beacon_context(&args, &whitelist);

    match verify_token(&args.code, &whitelist, beacon.as_ref(), args.fence.as_deref()) {
        Ok(payload) => {
            println!("{}", serde_json::json!({ "verified": true, "payload": payload }));
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::json!({ "verified": false, "reason": e.to_string() }));
            bail!("merchant code not verified: {e}")
        }
    }
}

/// Prints version information to stdout.
fn print_version() {
    println!("proxpay-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", proxpay_protocol::config::PROTOCOL_VERSION);
    println!("curve        {}", proxpay_protocol::config::KEY_AGREEMENT_CURVE);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
