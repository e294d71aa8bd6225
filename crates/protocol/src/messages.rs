//! Endpoint names and request messages
//!
//! The daemon publishes two pull endpoints and initiates connections to a
//! third one on every tick:
//!
//! | endpoint         | direction            | payload                      |
//! |------------------|----------------------|------------------------------|
//! | `interface-info` | daemon -> client     | one string per device line   |
//! | `rule-set`       | daemon -> client     | one string per rule          |
//! | `rule-update`    | client -> daemon     | a [`Request`]                |

use crate::error::{ProtocolError, Result};
use std::path::{Path, PathBuf};

/// Default directory holding the endpoint sockets
pub const DEFAULT_SOCKET_DIR: &str = "/run/usbgate";

/// Named IPC endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Pull: enumerated device and interface lines
    InterfaceInfo,
    /// Pull: the active rule set in machine form
    RuleSet,
    /// Push: listened on by the client, connected to by the daemon
    RuleUpdate,
}

impl Endpoint {
    /// Logical endpoint name
    pub fn name(self) -> &'static str {
        match self {
            Self::InterfaceInfo => "interface-info",
            Self::RuleSet => "rule-set",
            Self::RuleUpdate => "rule-update",
        }
    }

    /// Socket file name inside the socket directory
    pub fn socket_name(self) -> String {
        format!("{}.sock", self.name())
    }

    /// Full socket path for this endpoint
    pub fn path_in(self, socket_dir: &Path) -> PathBuf {
        socket_dir.join(self.socket_name())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Wire value of the request type field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RequestType {
    UploadRuleSet = 0,
    LoadRuleSet = 1,
    SaveRuleSet = 2,
}

impl TryFrom<u16> for RequestType {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Self::UploadRuleSet),
            1 => Ok(Self::LoadRuleSet),
            2 => Ok(Self::SaveRuleSet),
            other => Err(ProtocolError::UnknownRequest(other)),
        }
    }
}

/// Request sent by a client over the `rule-update` endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Replace the whole rule set with these rule lines and persist it
    UploadRuleSet(Vec<String>),
    /// Load the named rule file and make it active
    LoadRuleSet(String),
    /// Change the active save target without writing
    SaveRuleSet(String),
}

impl Request {
    /// Wire type of this request
    pub fn request_type(&self) -> RequestType {
        match self {
            Self::UploadRuleSet(_) => RequestType::UploadRuleSet,
            Self::LoadRuleSet(_) => RequestType::LoadRuleSet,
            Self::SaveRuleSet(_) => RequestType::SaveRuleSet,
        }
    }
}
