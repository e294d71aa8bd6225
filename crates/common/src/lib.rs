//! Common building blocks for usbgate
//!
//! This crate provides what the daemon and its clients share: the descriptor,
//! rule and rule set policy model, error handling, logging setup, and the
//! channel bridge between the async IPC side and the blocking control thread.

pub mod channel;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod rule;
pub mod rule_set;

pub use channel::{
    ControlBridge, ControlCommand, ControlWorker, EnforceOutcome, ScanReport,
    create_control_bridge,
};
pub use descriptor::{Descriptor, Field, WILDCARD};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use rule::{Rule, RuleParseError, Verdict};
pub use rule_set::{DEFAULT_RULE_FILE, RuleSet, RuleSetError};
