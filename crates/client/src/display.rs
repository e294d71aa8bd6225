//! Terminal rendering of daemon snapshots

use common::Rule;
use protocol::{DeviceRecord, interface_class_label};
use std::fmt::Write;

/// Multi-line description of one device and its interfaces
pub fn format_device(device: &DeviceRecord) -> String {
    let mut out = String::new();
    let status = if device.is_restricted() {
        "  [RESTRICTED]"
    } else {
        ""
    };

    let _ = writeln!(
        out,
        "{} ({})  {:04x}:{:04x}  bus {} port {}{}",
        device.product,
        device.manufacturer,
        device.vendor_id,
        device.product_id,
        device.bus,
        device.port,
        status
    );

    for (index, interface) in device.interfaces.iter().enumerate() {
        let classes = interface
            .setting_classes
            .iter()
            .map(|class| format!("{} ({})", interface_class_label(*class), class))
            .collect::<Vec<_>>()
            .join(", ");
        let state = if interface.permitted {
            "permitted"
        } else {
            "blocked"
        };
        let _ = writeln!(out, "    interface {}: {} [{}]", index, classes, state);
    }

    out
}

/// One rule per line with its priority and field labels
///
/// Lines that do not parse are shown as received.
pub fn format_rules(lines: &[String]) -> String {
    let mut out = String::new();
    for (index, line) in lines.iter().enumerate() {
        let shown = line
            .parse::<Rule>()
            .map(|rule| rule.render(true))
            .unwrap_or_else(|_| line.clone());
        let _ = writeln!(out, "{:>3}. {}", index + 1, shown);
    }
    out
}
