//! usbgate Server
//!
//! USB access control daemon. Periodically enumerates attached USB devices,
//! evaluates every interface against the active rule set and unbinds the
//! kernel driver from interfaces the rules prohibit. Device information and
//! the rule set are published to local editors over Unix sockets.

mod active_rules;
mod config;
mod control;
mod ipc;
mod usb;

use active_rules::{RulePointer, load_active_rules};
use anyhow::{Context, Result};
use clap::Parser;
use common::{ControlBridge, ControlCommand, RuleSet, create_control_bridge, setup_logging};
use control::Control;
use ipc::IpcServer;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use usb::{ControlThread, UsbEnumerator, spawn_control_worker};

/// How long shutdown waits for the control thread to finish its current cycle
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "usbgate-server")]
#[command(author, version, about = "usbgate - USB interface access control daemon")]
#[command(long_about = "
Enforces a USB access policy by binding and unbinding kernel drivers per
interface. Rules are evaluated top to bottom; the first matching rule decides
and interfaces no rule matches are permitted.

EXAMPLES:
    # Run with default config
    usbgate-server

    # Run with custom config
    usbgate-server --config /path/to/server.toml

    # Validate a rule file and print it with field labels
    usbgate-server --check-rules /etc/usbgate/default.rules

    # Run with debug logging
    usbgate-server --log-level debug

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbgate/server.toml
    3. /etc/usbgate/server.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Parse a rule file, print it in labeled form and exit
    #[arg(long, value_name = "FILE")]
    check_rules: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = config::ServerConfig::default();
        let path = config::ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // Load configuration first (to get log level from config if not specified)
    let config = if let Some(ref path) = args.config {
        config::ServerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        config::ServerConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    if let Some(path) = args.check_rules {
        return check_rules(&path);
    }

    info!("usbgate Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let rules_root = config.rules.root();
    let pointer = RulePointer::new(&rules_root, &config.rules.pointer_file);
    let rule_set = load_active_rules(&rules_root, &config.rules.default_file, &pointer);

    let mut enumerator = UsbEnumerator::new();
    if let Err(e) = enumerator.init() {
        error!("{}; enforcement disabled", e);
    }

    // Start control thread (sync USB ops in a dedicated thread)
    let (bridge, worker) = create_control_bridge();
    let control = Control::new(enumerator, rule_set);
    let worker_handle = spawn_control_worker(ControlThread::new(control, pointer, worker))
        .context("Failed to spawn control thread")?;

    let result = run(&config, bridge.clone()).await;

    info!("Shutting down control thread...");
    if let Err(e) = bridge.send_command(ControlCommand::Shutdown).await {
        warn!("Error shutting down control thread: {}", e);
    }
    drop(bridge);

    let join = tokio::task::spawn_blocking(move || worker_handle.join());
    match tokio::time::timeout(WORKER_JOIN_TIMEOUT, join).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!("Control thread panicked: {:?}", e),
        Ok(Err(e)) => error!("Failed to join control thread: {}", e),
        Err(_) => warn!("Control thread still busy after {:?}", WORKER_JOIN_TIMEOUT),
    }

    info!("Server shutdown complete");
    result
}

/// Serve the IPC endpoints until Ctrl+C
async fn run(config: &config::ServerConfig, bridge: ControlBridge) -> Result<()> {
    let server = IpcServer::bind(&config.ipc, &config.enforcement, bridge)
        .context("Failed to bind IPC sockets")?;

    info!("Sockets in {}", server.socket_dir().display());
    info!("Press Ctrl+C to shutdown");

    server
        .run(async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                Err(e) => error!("Error waiting for Ctrl+C: {}", e),
            }
        })
        .await;

    Ok(())
}

/// Validate a rule file and print it
fn check_rules(path: &Path) -> Result<()> {
    let mut rule_set = RuleSet::new(PathBuf::new());
    let count = rule_set
        .load(path)
        .with_context(|| format!("Failed to check {}", path.display()))?;

    println!("{} rule(s) in {}:\n", count, path.display());
    for (index, rule) in rule_set.iter().enumerate() {
        println!("  {:>3}. {}", index + 1, rule.render(true));
    }

    Ok(())
}
