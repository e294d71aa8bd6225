//! Control worker thread
//!
//! Dedicated thread owning the enforcement engine. Every libusb call blocks,
//! so the Tokio runtime never touches the engine directly; it sends
//! [`ControlCommand`]s and awaits the replies.
//!
//! Commands are handled strictly one at a time, which is what keeps
//! enforcement cycles and rule set mutations from interleaving.

use crate::active_rules::RulePointer;
use crate::control::Control;
use crate::usb::Enumerator;
use common::{ControlCommand, ControlWorker, EnforceOutcome};
use tracing::{debug, error, info, warn};

/// Control worker thread
pub struct ControlThread<E: Enumerator> {
    control: Control<E>,
    pointer: RulePointer,
    /// Communication channel with Tokio runtime
    worker: ControlWorker,
}

impl<E: Enumerator> ControlThread<E> {
    pub fn new(control: Control<E>, pointer: RulePointer, worker: ControlWorker) -> Self {
        Self {
            control,
            pointer,
            worker,
        }
    }

    /// Run until a Shutdown command arrives or every bridge handle is dropped
    pub fn run(mut self) {
        info!("Control thread started");

        loop {
            match self.worker.recv_command() {
                Ok(ControlCommand::Shutdown) => {
                    info!("Control thread shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => {
                    debug!("Control channel closed: {}", e);
                    break;
                }
            }
        }

        info!("Control thread stopped");
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&mut self, cmd: ControlCommand) {
        // A panic drops the reply sender; the caller sees a channel error
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in control command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::Enforce {
                gather_info,
                response,
            } => {
                let report = self.control.enforce_rule_set(gather_info);
                if report.changed() {
                    info!(
                        "Enforcement: {} detached, {} reattached ({} devices, {} skipped)",
                        report.detached, report.reattached, report.devices, report.skipped
                    );
                } else {
                    debug!(
                        "Enforcement: {} devices, {} skipped, {} interface(s) forced off",
                        report.devices,
                        report.skipped,
                        self.control.forced_off().count()
                    );
                }

                let interface_info =
                    gather_info.then(|| self.control.interface_info().to_vec());
                let _ = response.send(EnforceOutcome {
                    report,
                    interface_info,
                });
            }

            ControlCommand::ReplaceRules { rules, response } => {
                let rule_set = self.control.rule_set_mut();
                rule_set.replace(rules);
                info!("Rule set replaced with {} rule(s)", rule_set.len());

                match rule_set.save() {
                    Ok(()) => {
                        if let Err(e) = self.pointer.record(rule_set.path()) {
                            warn!(
                                "Failed to update {}: {}",
                                self.pointer.file().display(),
                                e
                            );
                        }
                    }
                    Err(e) => warn!("{}", e),
                }

                let _ = response.send(rule_set.lines());
            }

            ControlCommand::LoadRules { path, response } => {
                let rule_set = self.control.rule_set_mut();
                let result = match rule_set.load(&path) {
                    Ok(count) => {
                        info!("Loaded {} rule(s) from {}", count, rule_set.file().display());
                        if let Err(e) = self.pointer.record(&path) {
                            warn!(
                                "Failed to update {}: {}",
                                self.pointer.file().display(),
                                e
                            );
                        }
                        Ok(rule_set.lines())
                    }
                    Err(e) => {
                        warn!("{}", e);
                        Err(e.into())
                    }
                };
                let _ = response.send(result);
            }

            ControlCommand::SetRulePath { path, response } => {
                info!("Rule set will be saved to {}", path.display());
                self.control.rule_set_mut().set_path(path);
                let _ = response.send(());
            }

            ControlCommand::ListRules { response } => {
                let _ = response.send(self.control.rule_set().lines());
            }

            ControlCommand::Shutdown => {
                // Handled in run
            }
        }
    }
}

/// Spawn the control worker thread
///
/// The thread runs until a Shutdown command is received or the bridge is dropped.
pub fn spawn_control_worker<E>(
    thread: ControlThread<E>,
) -> std::io::Result<std::thread::JoinHandle<()>>
where
    E: Enumerator + Send + 'static,
{
    std::thread::Builder::new()
        .name("control-worker".to_string())
        .spawn(move || thread.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::fake::{FakeDevice, FakeInterface, SharedBus};
    use common::{Descriptor, Rule, RuleSet, create_control_bridge};
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn spawn(
        bus: &SharedBus,
        root: &Path,
    ) -> (common::ControlBridge, std::thread::JoinHandle<()>) {
        let (bridge, worker) = create_control_bridge();
        let control = Control::new(bus.enumerator(), RuleSet::new(root));
        let thread = ControlThread::new(control, RulePointer::new(root, "active"), worker);
        (bridge, spawn_control_worker(thread).unwrap())
    }

    fn storage_bus() -> SharedBus {
        SharedBus::new(vec![
            FakeDevice::new(1, 3, 0x0781, 0x5567).with_interface(FakeInterface::bound(0, 8)),
        ])
    }

    #[tokio::test]
    async fn test_replace_rules_persists_and_enforces() {
        let dir = TempDir::new().unwrap();
        let bus = storage_bus();
        let (bridge, handle) = spawn(&bus, dir.path());

        let rules = vec![Rule::prohibit(Descriptor::new(0, 0, 0, 0, 8))];
        let lines = bridge
            .request(|response| ControlCommand::ReplaceRules { rules, response })
            .await
            .unwrap();
        assert_eq!(lines, vec!["0 0 0 0 8 0".to_string()]);
        assert_eq!(
            fs::read_to_string(dir.path().join("default.rules")).unwrap(),
            "0 0 0 0 8 0\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("active")).unwrap(),
            "default.rules\n"
        );

        let outcome = bridge
            .request(|response| ControlCommand::Enforce {
                gather_info: true,
                response,
            })
            .await
            .unwrap();
        assert_eq!(outcome.report.detached, 1);
        assert_eq!(outcome.interface_info.unwrap().len(), 1);

        bridge.send_command(ControlCommand::Shutdown).await.unwrap();
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_enforce_without_gather_has_no_info() {
        let dir = TempDir::new().unwrap();
        let bus = storage_bus();
        let (bridge, handle) = spawn(&bus, dir.path());

        let outcome = bridge
            .request(|response| ControlCommand::Enforce {
                gather_info: false,
                response,
            })
            .await
            .unwrap();
        assert!(outcome.interface_info.is_none());
        assert_eq!(outcome.report.devices, 1);

        drop(bridge);
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_load_rules_updates_pointer() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("office.rules"), "0 0 0 0 8 0\n").unwrap();
        let bus = storage_bus();
        let (bridge, handle) = spawn(&bus, dir.path());

        let lines = bridge
            .request(|response| ControlCommand::LoadRules {
                path: PathBuf::from("office.rules"),
                response,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lines, vec!["0 0 0 0 8 0".to_string()]);
        assert_eq!(
            RulePointer::new(dir.path(), "active").read(),
            Some(PathBuf::from("office.rules"))
        );

        bridge.send_command(ControlCommand::Shutdown).await.unwrap();
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_failed_load_keeps_rules() {
        let dir = TempDir::new().unwrap();
        let bus = storage_bus();
        let (bridge, handle) = spawn(&bus, dir.path());

        let rules = vec![Rule::permit(Descriptor::ANY)];
        bridge
            .request(|response| ControlCommand::ReplaceRules { rules, response })
            .await
            .unwrap();

        let result = bridge
            .request(|response| ControlCommand::LoadRules {
                path: PathBuf::from("missing.rules"),
                response,
            })
            .await
            .unwrap();
        assert!(result.is_err());

        let lines = bridge
            .request(|response| ControlCommand::ListRules { response })
            .await
            .unwrap();
        assert_eq!(lines, vec!["0 0 0 0 0 1".to_string()]);
        assert_eq!(
            RulePointer::new(dir.path(), "active").read(),
            Some(PathBuf::from("default.rules"))
        );

        bridge.send_command(ControlCommand::Shutdown).await.unwrap();
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_set_rule_path_does_not_write() {
        let dir = TempDir::new().unwrap();
        let bus = storage_bus();
        let (bridge, handle) = spawn(&bus, dir.path());

        bridge
            .request(|response| ControlCommand::SetRulePath {
                path: PathBuf::from("later.rules"),
                response,
            })
            .await
            .unwrap();
        assert!(!dir.path().join("later.rules").exists());
        assert!(!dir.path().join("active").exists());

        let rules = vec![Rule::permit(Descriptor::ANY)];
        bridge
            .request(|response| ControlCommand::ReplaceRules { rules, response })
            .await
            .unwrap();
        assert!(dir.path().join("later.rules").exists());

        bridge.send_command(ControlCommand::Shutdown).await.unwrap();
        handle.join().unwrap();
    }
}
