//! # CLI Interface
//!
//! Defines the command-line argument structure for `proxpay-node` using
//! `clap` derive. Supports four subcommands: `run`, `token`, `verify`,
//! and `version`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use proxpay_protocol::config::{BEACON_TIMEOUT, PROMPT_COOLDOWN};
use proxpay_protocol::gate::{GateConfig, PolicyMode};

use crate::logging::LogFormat;

/// ProxPay device agent.
///
/// Hosts the proximity trigger gate, keeps a session with the key server,
/// renders payment tokens as terminal QR codes and verifies merchant codes.
#[derive(Parser, Debug)]
#[command(
    name = "proxpay-node",
    about = "ProxPay device agent",
    version,
    propagate_version = true
)]
pub struct ProxPayCli {
    /// Log output format: `pretty` or `json`.
    #[arg(long, global = true, env = "PROXPAY_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl ProxPayCli {
    pub fn log_format(&self) -> LogFormat {
        LogFormat::from_str_lossy(&self.log_format)
    }
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the agent: read proximity events as JSON lines on stdin and
    /// show a payment QR whenever the gate opens.
    Run(RunArgs),
    /// Establish (or reuse) a session and print one payment token.
    Token(TokenArgs),
    /// Verify a merchant-presented code against a proximity context.
    Verify(VerifyArgs),
    /// Print version information and exit.
    Version,
}

/// Key server and local session storage.
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Base URL of the key-issuing server.
    #[arg(long, env = "PROXPAY_KEY_SERVER", default_value = "http://127.0.0.1:8080")]
    pub key_server: String,

    /// Directory for the persisted session record.
    #[arg(long, short = 'd', env = "PROXPAY_DATA_DIR", default_value = ".proxpay")]
    pub data_dir: PathBuf,

    /// Device identifier sent during key exchange.
    #[arg(long, env = "PROXPAY_DEVICE_ID", default_value = "proxpay-device")]
    pub device_id: String,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Beacon whitelist JSON file.
    #[arg(long, short = 'w', env = "PROXPAY_WHITELIST")]
    pub whitelist: PathBuf,

    /// Prompt policy: `beacon` (any whitelisted beacon) or `strict`.
    #[arg(long, env = "PROXPAY_POLICY", default_value = "beacon")]
    pub policy: PolicyMode,

    /// How long one beacon sighting keeps `near_beacon` asserted.
    #[arg(long, env = "PROXPAY_BEACON_TIMEOUT_MS", default_value_t = BEACON_TIMEOUT.as_millis() as u64)]
    pub beacon_timeout_ms: u64,

    /// Minimum spacing between two prompts.
    #[arg(long, env = "PROXPAY_COOLDOWN_MS", default_value_t = PROMPT_COOLDOWN.as_millis() as u64)]
    pub cooldown_ms: u64,

    /// Trusted Wi-Fi SSID. Repeatable.
    #[arg(long = "trusted-ssid", env = "PROXPAY_TRUSTED_SSIDS", value_delimiter = ',')]
    pub trusted_ssids: Vec<String>,

    /// Trusted Wi-Fi BSSID. Repeatable.
    #[arg(long = "trusted-bssid", env = "PROXPAY_TRUSTED_BSSIDS", value_delimiter = ',')]
    pub trusted_bssids: Vec<String>,

    /// Merchant id placed in tokens when the beacon does not name one.
    #[arg(long, env = "PROXPAY_MERCHANT_ID", default_value = "unknown")]
    pub merchant_id: String,

    /// Print the token string only, no QR rendering.
    #[arg(long)]
    pub no_qr: bool,
}

impl RunArgs {
    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            beacon_timeout: Duration::from_millis(self.beacon_timeout_ms),
            cooldown: Duration::from_millis(self.cooldown_ms),
            policy: self.policy,
        }
    }
}

/// Arguments for the `token` subcommand.
#[derive(Parser, Debug)]
pub struct TokenArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Merchant id for the payload.
    #[arg(long, short = 'm', env = "PROXPAY_MERCHANT_ID")]
    pub merchant_id: String,

    /// Amount in minor units.
    #[arg(long, short = 'a')]
    pub amount: Option<i64>,

    /// Extra payload field as `key=value`. Repeatable.
    #[arg(long = "extra", value_parser = parse_key_value)]
    pub extra: Vec<(String, String)>,

    /// Ask the key server to mint the token instead of building it locally.
    #[arg(long)]
    pub server_issued: bool,

    /// Print the token string only, no QR rendering.
    #[arg(long)]
    pub no_qr: bool,
}

/// Arguments for the `verify` subcommand.
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Beacon whitelist JSON file (holds the merchant keys).
    #[arg(long, short = 'w', env = "PROXPAY_WHITELIST")]
    pub whitelist: PathBuf,

    /// The scanned merchant code.
    #[arg(long, short = 'c')]
    pub code: String,

    /// Geofence the device is currently in.
    #[arg(long)]
    pub fence: Option<String>,

    /// Region UUID of the nearby beacon.
    #[arg(long, requires_all = ["major", "minor"])]
    pub beacon_uuid: Option<String>,

    #[arg(long)]
    pub major: Option<u16>,

    #[arg(long)]
    pub minor: Option<u16>,

    /// Nonce the nearby beacon is advertising.
    #[arg(long)]
    pub nonce: Option<String>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got `{s}`"))
}
