//! Protocol library for usbgate
//!
//! This crate defines the local IPC protocol between the enforcement daemon
//! and its display/editor clients: endpoint names, block framing, request
//! messages and the device record layout of the `interface-info` endpoint.
//!
//! # Example
//!
//! ```
//! use protocol::{Request, decode_request, encode_request, split_frame};
//!
//! let request = Request::LoadRuleSet("office.rules".to_string());
//! let frame = encode_request(&request).unwrap();
//!
//! let payload = split_frame(&frame).unwrap();
//! assert_eq!(decode_request(payload).unwrap(), request);
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;

pub use codec::{
    LENGTH_PREFIX_SIZE, MAX_BLOCK_SIZE, decode_block, decode_request, encode_block,
    encode_request, read_frame, split_frame,
};

#[cfg(feature = "async")]
pub use codec::{read_frame_async, read_optional_frame_async, write_frame_async};
pub use error::{ProtocolError, Result};
pub use messages::{DEFAULT_SOCKET_DIR, Endpoint, Request, RequestType};
pub use types::{
    DeviceRecord, InterfaceRecord, UNDEFINED_STRING, escape_device_string, interface_class_label,
};
