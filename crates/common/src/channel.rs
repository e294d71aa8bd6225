//! Async channel bridge between the Tokio runtime and the control thread
//!
//! All native USB calls block, so the enforcement engine lives on its own
//! thread and owns the rule set. The IPC side only ever talks to it through
//! these commands, one at a time, which keeps enforcement cycles strictly
//! sequential.

use crate::rule::Rule;
use async_channel::{Receiver, Sender, bounded};
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Counters from one enforcement cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Devices in the snapshot
    pub devices: usize,
    /// Devices skipped because a descriptor could not be read
    pub skipped: usize,
    /// Interfaces detached from their kernel driver this cycle
    pub detached: usize,
    /// Interfaces handed back to their kernel driver this cycle
    pub reattached: usize,
}

impl ScanReport {
    /// Whether the cycle changed any driver binding
    pub fn changed(&self) -> bool {
        self.detached > 0 || self.reattached > 0
    }
}

/// Reply to [`ControlCommand::Enforce`]
#[derive(Debug, Clone, Default)]
pub struct EnforceOutcome {
    pub report: ScanReport,
    /// Fresh info lines when the cycle gathered them
    pub interface_info: Option<Vec<String>>,
}

/// Commands from the Tokio runtime to the control thread
#[derive(Debug)]
pub enum ControlCommand {
    /// Run one enforcement cycle
    Enforce {
        /// Rebuild the interface info buffer this cycle
        gather_info: bool,
        response: oneshot::Sender<EnforceOutcome>,
    },

    /// Replace the whole rule set and persist it; replies with the new rule lines
    ReplaceRules {
        rules: Vec<Rule>,
        response: oneshot::Sender<Vec<String>>,
    },

    /// Load a rule file and make it active; replies with the new rule lines
    LoadRules {
        path: PathBuf,
        response: oneshot::Sender<crate::Result<Vec<String>>>,
    },

    /// Change the active rule file without writing it
    SetRulePath {
        path: PathBuf,
        response: oneshot::Sender<()>,
    },

    /// Current rule lines in priority order
    ListRules {
        response: oneshot::Sender<Vec<String>>,
    },

    /// Stop the control thread
    Shutdown,
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct ControlBridge {
    cmd_tx: Sender<ControlCommand>,
}

impl ControlBridge {
    /// Send a command to the control thread
    pub async fn send_command(&self, cmd: ControlCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command built around a fresh reply channel and wait for the reply
    pub async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControlCommand,
    ) -> crate::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send_command(build(tx)).await?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for the control thread (blocking)
pub struct ControlWorker {
    cmd_rx: Receiver<ControlCommand>,
}

impl ControlWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<ControlCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and the control thread
///
/// Returns (ControlBridge for Tokio, ControlWorker for the control thread)
pub fn create_control_bridge() -> (ControlBridge, ControlWorker) {
    let (cmd_tx, cmd_rx) = bounded(16);
    (ControlBridge { cmd_tx }, ControlWorker { cmd_rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_control_bridge();

        let handle = std::thread::spawn(move || match worker.recv_command().unwrap() {
            ControlCommand::ListRules { response } => {
                let _ = response.send(vec!["0 0 0 0 0 1".to_string()]);
                true
            }
            _ => false,
        });

        let lines = bridge
            .request(|response| ControlCommand::ListRules { response })
            .await
            .unwrap();

        assert!(handle.join().unwrap());
        assert_eq!(lines, vec!["0 0 0 0 0 1".to_string()]);
    }

    #[tokio::test]
    async fn test_request_fails_when_worker_gone() {
        let (bridge, worker) = create_control_bridge();
        drop(worker);

        let result = bridge
            .request(|response| ControlCommand::ListRules { response })
            .await;
        assert!(matches!(result, Err(crate::Error::Channel(_))));
    }

    #[test]
    fn test_report_changed() {
        assert!(!ScanReport::default().changed());
        assert!(
            ScanReport {
                detached: 1,
                ..Default::default()
            }
            .changed()
        );
    }
}
