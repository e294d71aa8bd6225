//! Shared data types carried over the IPC endpoints

use crate::error::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// Placeholder used when a device string descriptor is unavailable
pub const UNDEFINED_STRING: &str = "undefined";

/// Interface class labels, keyed by USB class code
static CLASS_LABELS: &[(u16, &str)] = &[
    (0x00, "INTERFACE SPEC"),
    (0x01, "AUDIO"),
    (0x02, "COMMUNICATION"),
    (0x03, "HID"),
    (0x05, "PHYSICAL"),
    (0x06, "PTP"),
    (0x07, "PRINTER"),
    (0x08, "MASS STORAGE"),
    (0x09, "HUB"),
    (0x0a, "DATA"),
    (0x0b, "SMART CARD"),
    (0x0d, "CONTENT SECURITY"),
    (0x0e, "VIDEO"),
    (0x0f, "PERSONAL HEALTHCARE"),
    (0xdc, "DIAGNOSTIC DEVICE"),
    (0xe0, "WIRELESS"),
    (0xfe, "APPLICATION"),
    (0xff, "VENDOR SPEC"),
];

/// Human readable label for a USB interface class code
pub fn interface_class_label(class: u16) -> &'static str {
    CLASS_LABELS
        .iter()
        .find(|(code, _)| *code == class)
        .map(|(_, label)| *label)
        .unwrap_or("UNDEFINED")
}

/// One interface as published on the `interface-info` endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    /// Interface class of every alternate setting, in setting order
    pub setting_classes: Vec<u16>,
    /// Final enforcement decision for the interface
    pub permitted: bool,
}

/// One device line as published on the `interface-info` endpoint
///
/// Line layout (space separated):
///
/// ```text
/// product manufacturer bus port vendor_id product_id interface_count
///     { setting_count class... permission }*
/// ```
///
/// Spaces inside product and manufacturer strings travel as underscores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub product: String,
    pub manufacturer: String,
    pub bus: u16,
    pub port: u16,
    pub vendor_id: u16,
    pub product_id: u16,
    pub interfaces: Vec<InterfaceRecord>,
}

impl DeviceRecord {
    /// True if any interface of the device is currently blocked
    pub fn is_restricted(&self) -> bool {
        self.interfaces.iter().any(|interface| !interface.permitted)
    }
}

/// Encode a device string for the space separated line
///
/// Every whitespace character becomes `_` so the string stays one token.
pub fn escape_device_string(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

fn unescape_device_string(value: &str) -> String {
    value.replace('_', " ")
}

struct Tokens<'a> {
    line: &'a str,
    inner: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn next_str(&mut self, what: &str) -> Result<&'a str, ProtocolError> {
        self.inner
            .next()
            .ok_or_else(|| ProtocolError::MalformedRecord(format!("missing {what} in '{}'", self.line)))
    }

    fn next_number(&mut self, what: &str) -> Result<u16, ProtocolError> {
        let token = self.next_str(what)?;
        token.parse().map_err(|_| {
            ProtocolError::MalformedRecord(format!("invalid {what} '{token}' in '{}'", self.line))
        })
    }
}

impl FromStr for DeviceRecord {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = Tokens {
            line,
            inner: line.split_whitespace(),
        };

        let product = unescape_device_string(tokens.next_str("product")?);
        let manufacturer = unescape_device_string(tokens.next_str("manufacturer")?);
        let bus = tokens.next_number("bus")?;
        let port = tokens.next_number("port")?;
        let vendor_id = tokens.next_number("vendor id")?;
        let product_id = tokens.next_number("product id")?;
        let interface_count = tokens.next_number("interface count")?;

        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            let setting_count = tokens.next_number("setting count")?;
            let setting_classes = (0..setting_count)
                .map(|_| tokens.next_number("interface class"))
                .collect::<Result<Vec<_>, _>>()?;
            let permitted = match tokens.next_str("permission")? {
                "1" => true,
                "0" => false,
                other => {
                    return Err(ProtocolError::MalformedRecord(format!(
                        "invalid permission '{other}' in '{line}'"
                    )));
                }
            };
            interfaces.push(InterfaceRecord {
                setting_classes,
                permitted,
            });
        }

        Ok(Self {
            product,
            manufacturer,
            bus,
            port,
            vendor_id,
            product_id,
            interfaces,
        })
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            escape_device_string(&self.product),
            escape_device_string(&self.manufacturer),
            self.bus,
            self.port,
            self.vendor_id,
            self.product_id,
            self.interfaces.len()
        )?;
        for interface in &self.interfaces {
            write!(f, " {}", interface.setting_classes.len())?;
            for class in &interface.setting_classes {
                write!(f, " {}", class)?;
            }
            write!(f, " {}", u8::from(interface.permitted))?;
        }
        Ok(())
    }
}
