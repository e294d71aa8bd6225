//! usbgate Client
//!
//! Command line editor for the usbgate daemon. Shows the attached devices
//! with their enforcement state, prints the active rule set and submits
//! rule updates.

mod display;
mod ipc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use common::{Rule, setup_logging};
use protocol::{DEFAULT_SOCKET_DIR, DeviceRecord, Endpoint, Request};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "usbgate-client")]
#[command(author, version, about = "usbgate client - inspect and edit the USB access policy")]
#[command(long_about = "
Talks to a running usbgate-server over its local sockets.

Updates are picked up by the daemon on its next enforcement tick, so the
upload, load and save-path commands wait until the daemon connects.

EXAMPLES:
    # Show attached devices and which interfaces are blocked
    usbgate-client devices

    # Print the active rules with field labels
    usbgate-client rules

    # Replace the active rules with the contents of a file
    usbgate-client upload office.rules

    # Make a rule file in the daemon's rule directory active
    usbgate-client load office.rules

    # Save future uploads under another name
    usbgate-client save-path lab.rules
")]
struct Args {
    /// Directory holding the daemon's sockets
    #[arg(short, long, value_name = "DIR", default_value = DEFAULT_SOCKET_DIR)]
    socket_dir: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,

    /// Seconds to wait for the daemon to pick up an update
    #[arg(short, long, value_name = "SECS", default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices and their interfaces
    Devices {
        /// Print the lines exactly as published
        #[arg(long)]
        raw: bool,
    },
    /// Print the active rule set, highest priority first
    Rules {
        /// Print the lines exactly as published
        #[arg(long)]
        raw: bool,
    },
    /// Replace the active rule set with the rules in FILE
    Upload {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Load a rule file from the daemon's rule directory
    Load {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Change where the daemon saves the rule set, without writing
    SavePath {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level).context("Failed to setup logging")?;

    let socket_dir = PathBuf::from(shellexpand::tilde(&args.socket_dir).into_owned());
    let wait = Duration::from_secs(args.timeout);
    debug!("Using sockets in {}", socket_dir.display());

    match args.command {
        Command::Devices { raw } => show_devices(&socket_dir, raw).await,
        Command::Rules { raw } => show_rules(&socket_dir, raw).await,
        Command::Upload { file } => {
            let lines = read_rule_lines(&file)?;
            let count = lines.len();
            ipc::push(&socket_dir, &Request::UploadRuleSet(lines), wait).await?;
            println!("Uploaded {} rule(s) from {}", count, file.display());
            Ok(())
        }
        Command::Load { name } => {
            ipc::push(&socket_dir, &Request::LoadRuleSet(name.clone()), wait).await?;
            println!("Requested load of {}", name);
            Ok(())
        }
        Command::SavePath { name } => {
            ipc::push(&socket_dir, &Request::SaveRuleSet(name.clone()), wait).await?;
            println!("Rule set will be saved to {}", name);
            Ok(())
        }
    }
}

async fn show_devices(socket_dir: &Path, raw: bool) -> Result<()> {
    let lines = ipc::pull(socket_dir, Endpoint::InterfaceInfo).await?;
    if lines.is_empty() {
        println!("No devices reported yet");
        return Ok(());
    }

    for line in &lines {
        if raw {
            println!("{}", line);
            continue;
        }
        match line.parse::<DeviceRecord>() {
            Ok(record) => println!("{}", display::format_device(&record)),
            Err(e) => warn!("Skipping device line: {}", e),
        }
    }
    Ok(())
}

async fn show_rules(socket_dir: &Path, raw: bool) -> Result<()> {
    let lines = ipc::pull(socket_dir, Endpoint::RuleSet).await?;
    if lines.is_empty() {
        println!("Rule set is empty; every interface is permitted");
    } else if raw {
        for line in &lines {
            println!("{}", line);
        }
    } else {
        print!("{}", display::format_rules(&lines));
    }
    Ok(())
}

/// Non-empty lines of a rule file, checked before they are sent
///
/// The daemon drops lines it cannot parse, so a file with any bad line is
/// refused here instead of being half applied.
fn read_rule_lines(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut lines = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = Rule::parse_annotated(line) {
            bail!("{}:{}: {}", path.display(), number + 1, e);
        }
        lines.push(line.to_string());
    }
    Ok(lines)
}
