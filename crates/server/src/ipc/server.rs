//! Daemon event loop
//!
//! One task drives everything the outside world sees: the enforcement timer,
//! the two pull endpoints and the `rule-update` poll. Enforcement itself runs
//! on the control thread; this loop only ever waits for one cycle at a time
//! and gives up waiting after the scan timeout, so a hung device cannot stall
//! the pull endpoints.

use super::sockets::PullSockets;
use crate::config::{EnforcementSettings, IpcSettings};
use common::{ControlBridge, ControlCommand, EnforceOutcome, Rule};
use protocol::{
    Endpoint, Request, decode_request, encode_block, read_optional_frame_async, write_frame_async,
};
use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, info, trace, warn};

pub struct IpcServer {
    bridge: ControlBridge,
    sockets: PullSockets,
    socket_dir: PathBuf,
    connect_timeout: Duration,
    request_timeout: Duration,
    tick_interval: Duration,
    gather_every: u64,
    scan_timeout: Duration,
    /// Enforcement cycles started so far
    cycles: u64,
    /// Reply of a cycle that outlived the scan timeout
    pending: Option<oneshot::Receiver<EnforceOutcome>>,
    interface_info: Vec<String>,
    rule_lines: Vec<String>,
}

impl IpcServer {
    /// Bind the pull endpoints
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(
        ipc: &IpcSettings,
        enforcement: &EnforcementSettings,
        bridge: ControlBridge,
    ) -> io::Result<Self> {
        let socket_dir = ipc.socket_dir();
        let sockets = PullSockets::bind(&socket_dir, ipc.socket_mode)?;

        Ok(Self {
            bridge,
            sockets,
            socket_dir,
            connect_timeout: ipc.connect_timeout(),
            request_timeout: ipc.request_timeout(),
            tick_interval: enforcement.tick_interval(),
            gather_every: u64::from(enforcement.gather_every.max(1)),
            scan_timeout: enforcement.scan_timeout(),
            cycles: 0,
            pending: None,
            interface_info: Vec::new(),
            rule_lines: Vec::new(),
        })
    }

    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    /// Serve until `shutdown` completes
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        if let Some(lines) = self
            .control_request(|response| ControlCommand::ListRules { response })
            .await
        {
            self.rule_lines = lines;
        }

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "Enforcing every {:?}, gathering device info every {} cycle(s)",
            self.tick_interval, self.gather_every
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("IPC server shutting down");
                    break;
                }
                _ = interval.tick() => self.on_tick().await,
                accepted = self.sockets.interface_info.accept() => {
                    self.serve(accepted, Endpoint::InterfaceInfo).await;
                }
                accepted = self.sockets.rule_set.accept() => {
                    self.serve(accepted, Endpoint::RuleSet).await;
                }
            }
        }
    }

    async fn on_tick(&mut self) {
        if let Some(mut pending) = self.pending.take() {
            match pending.try_recv() {
                Ok(outcome) => {
                    debug!("Overdue enforcement cycle finished");
                    self.apply_outcome(outcome);
                }
                Err(oneshot::error::TryRecvError::Empty) => {
                    trace!("Enforcement cycle still running, skipping tick");
                    self.pending = Some(pending);
                    return;
                }
                Err(oneshot::error::TryRecvError::Closed) => {
                    warn!("Overdue enforcement cycle was aborted");
                }
            }
        }

        self.poll_rule_update().await;
        self.enforce().await;
    }

    async fn enforce(&mut self) {
        let gather_info = self.cycles % self.gather_every == 0;
        self.cycles += 1;

        let (response, mut rx) = oneshot::channel();
        let command = ControlCommand::Enforce {
            gather_info,
            response,
        };
        if let Err(e) = self.bridge.send_command(command).await {
            warn!("Failed to start enforcement cycle: {}", e);
            return;
        }

        match timeout(self.scan_timeout, &mut rx).await {
            Ok(Ok(outcome)) => self.apply_outcome(outcome),
            Ok(Err(_)) => warn!("Enforcement cycle was aborted"),
            Err(_) => {
                warn!(
                    "Enforcement cycle exceeded {:?}, no new cycle until it finishes",
                    self.scan_timeout
                );
                self.pending = Some(rx);
            }
        }
    }

    fn apply_outcome(&mut self, outcome: EnforceOutcome) {
        if let Some(info) = outcome.interface_info {
            self.interface_info = info;
        }
    }

    /// Connect to a listening editor, if any, and apply its request
    async fn poll_rule_update(&mut self) {
        let path = Endpoint::RuleUpdate.path_in(&self.socket_dir);

        let mut stream = match timeout(self.connect_timeout, UnixStream::connect(&path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                trace!("No client on {}: {}", path.display(), e);
                return;
            }
            Err(_) => {
                debug!("Timed out connecting to {}", path.display());
                return;
            }
        };

        let payload =
            match timeout(self.request_timeout, read_optional_frame_async(&mut stream)).await {
                Ok(Ok(Some(payload))) => payload,
                Ok(Ok(None)) => return,
                Ok(Err(e)) => {
                    warn!("Dropping {} connection: {}", Endpoint::RuleUpdate, e);
                    return;
                }
                Err(_) => {
                    warn!("Timed out waiting for a {} request", Endpoint::RuleUpdate);
                    return;
                }
            };

        match decode_request(&payload) {
            Ok(request) => self.apply_request(request).await,
            Err(e) => warn!("Dropping {} request: {}", Endpoint::RuleUpdate, e),
        }
    }

    async fn apply_request(&mut self, request: Request) {
        match request {
            Request::UploadRuleSet(lines) => {
                let mut rules = Vec::with_capacity(lines.len());
                for line in &lines {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Rule::parse_annotated(line) {
                        Ok(rule) => rules.push(rule),
                        Err(e) => warn!("Skipping uploaded rule '{}': {}", line, e),
                    }
                }
                info!("Received rule set with {} rule(s)", rules.len());

                if let Some(lines) = self
                    .control_request(|response| ControlCommand::ReplaceRules { rules, response })
                    .await
                {
                    self.rule_lines = lines;
                }
            }

            Request::LoadRuleSet(name) => {
                let Some(path) = rule_file_name(&name) else {
                    warn!("Refusing to load rule file '{}'", name);
                    return;
                };
                match self
                    .control_request(|response| ControlCommand::LoadRules { path, response })
                    .await
                {
                    Some(Ok(lines)) => self.rule_lines = lines,
                    // already logged by the control thread
                    Some(Err(_)) | None => {}
                }
            }

            Request::SaveRuleSet(name) => {
                let Some(path) = rule_file_name(&name) else {
                    warn!("Refusing to save rule set to '{}'", name);
                    return;
                };
                self.control_request(|response| ControlCommand::SetRulePath { path, response })
                    .await;
            }
        }
    }

    /// Send one pull snapshot and close
    async fn serve(
        &self,
        accepted: io::Result<(UnixStream, tokio::net::unix::SocketAddr)>,
        endpoint: Endpoint,
    ) {
        let mut stream = match accepted {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!("Failed to accept on {}: {}", endpoint, e);
                return;
            }
        };

        let lines = match endpoint {
            Endpoint::InterfaceInfo => &self.interface_info,
            _ => &self.rule_lines,
        };

        let frame = match encode_block(lines) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Cannot publish {}: {}", endpoint, e);
                return;
            }
        };

        match timeout(self.request_timeout, write_frame_async(&mut stream, &frame)).await {
            Ok(Ok(())) => trace!("Sent {} line(s) on {}", lines.len(), endpoint),
            Ok(Err(e)) => debug!("Failed to send {}: {}", endpoint, e),
            Err(_) => debug!("Timed out sending {}", endpoint),
        }
        let _ = stream.shutdown().await;
    }

    /// Ask the control thread for something, giving up after the scan timeout
    async fn control_request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControlCommand,
    ) -> Option<T> {
        match timeout(self.scan_timeout, self.bridge.request(build)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!("Control thread request failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Control thread did not answer within {:?}", self.scan_timeout);
                None
            }
        }
    }
}

/// Client supplied rule file name, relative to the rule root
///
/// Absolute paths and parent directory components are rejected.
fn rule_file_name(name: &str) -> Option<PathBuf> {
    let path = PathBuf::from(name.trim());
    let plain = path
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    (plain && path.components().next().is_some()).then_some(path)
}
