//! Local IPC subsystem
//!
//! # Architecture
//!
//! ```text
//! IpcServer (Tokio task)
//!   ├─> timer tick
//!   │     ├─> connect to rule-update, apply one request
//!   │     └─> Enforce via ControlBridge (waits up to scan_timeout)
//!   ├─> interface-info accept -> one frame of cached info lines
//!   └─> rule-set accept -> one frame of cached rule lines
//! ```

pub mod server;
pub mod sockets;

pub use server::IpcServer;
pub use sockets::PullSockets;
