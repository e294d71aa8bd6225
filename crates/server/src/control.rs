//! Enforcement engine
//!
//! Every cycle walks a fresh device snapshot, evaluates each interface of the
//! active configuration against the rule set and binds or unbinds its kernel
//! driver accordingly. Interfaces the engine itself unbound are remembered so
//! they can be handed back once the rules permit them again.

use crate::usb::{ConfigView, DeviceIdentity, DriverHandle, Enumerator, UsbDevice};
use common::{Descriptor, RuleSet, ScanReport, WILDCARD};
use protocol::{UNDEFINED_STRING, escape_device_string};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Size of the buffer string descriptors are read into, NUL included
const STRING_BUFFER_SIZE: usize = 128;

/// Identity of one interface on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceKey {
    pub bus: u8,
    pub port: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
}

impl InterfaceKey {
    fn new(bus: u8, port: u8, identity: &DeviceIdentity, interface: u8) -> Self {
        Self {
            bus,
            port,
            vendor_id: identity.vendor_id,
            product_id: identity.product_id,
            interface,
        }
    }
}

pub struct Control<E: Enumerator> {
    enumerator: E,
    rule_set: RuleSet,
    /// Interfaces detached by us, with the descriptor that was prohibited
    forced_off: BTreeMap<InterfaceKey, Descriptor>,
    interface_info: Vec<String>,
}

impl<E: Enumerator> Control<E> {
    pub fn new(enumerator: E, rule_set: RuleSet) -> Self {
        Self {
            enumerator,
            rule_set,
            forced_off: BTreeMap::new(),
            interface_info: Vec::new(),
        }
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }

    pub fn rule_set_mut(&mut self) -> &mut RuleSet {
        &mut self.rule_set
    }

    /// Info lines from the last cycle that gathered them
    pub fn interface_info(&self) -> &[String] {
        &self.interface_info
    }

    pub fn forced_off(&self) -> impl Iterator<Item = (&InterfaceKey, &Descriptor)> {
        self.forced_off.iter()
    }

    /// Run one enforcement cycle
    ///
    /// With `gather_info` the info buffer is rebuilt from this cycle's
    /// snapshot. Every per-device failure is absorbed; the next cycle retries.
    pub fn enforce_rule_set(&mut self, gather_info: bool) -> ScanReport {
        let mut report = ScanReport::default();

        if !self.enumerator.is_initialized() {
            return report;
        }

        if gather_info {
            self.interface_info.clear();
        }

        report.devices = match self.enumerator.scan() {
            Ok(count) => count,
            Err(e) => {
                warn!("USB scan failed: {}", e);
                return report;
            }
        };

        while let Some(device) = self.enumerator.next_device() {
            if !self.enforce_device(&device, gather_info, &mut report) {
                report.skipped += 1;
            }
        }

        report
    }

    /// Returns false if the device was skipped
    fn enforce_device(
        &mut self,
        device: &E::Device,
        gather_info: bool,
        report: &mut ScanReport,
    ) -> bool {
        let bus = device.bus_number();
        let port = device.port_number();

        let identity = match device.identity() {
            Ok(identity) => identity,
            Err(e) => {
                debug!("Skipping device at {}-{}: {}", bus, port, e);
                return false;
            }
        };

        let config = match device.active_config() {
            Ok(config) => config,
            Err(e) => {
                debug!(
                    "Skipping device {:04x}:{:04x} at {}-{}: no active configuration: {}",
                    identity.vendor_id, identity.product_id, bus, port, e
                );
                return false;
            }
        };

        let device_descriptor = Descriptor::new(
            bus.into(),
            port.into(),
            identity.vendor_id,
            identity.product_id,
            WILDCARD,
        );
        let interfaces = config.interfaces();

        let mut line = gather_info.then(|| {
            let (product, manufacturer) = read_strings(device, &identity);
            format!(
                "{} {} {} {}",
                product,
                manufacturer,
                device_descriptor.device_fields(),
                interfaces.len()
            )
        });

        for interface in &interfaces {
            let key = InterfaceKey::new(bus, port, &identity, interface.number);

            // the first prohibited setting decides for the whole interface
            let prohibited = interface
                .alt_classes
                .iter()
                .map(|class| device_descriptor.with_interface_class((*class).into()))
                .find(|descriptor| !self.rule_set.permission(descriptor));

            match prohibited {
                Some(descriptor) => {
                    if self.disable(device, key, descriptor) {
                        report.detached += 1;
                    }
                }
                None if self.forced_off.contains_key(&key) => {
                    if self.enable(device, key) {
                        report.reattached += 1;
                    }
                }
                None => {}
            }

            if let Some(line) = line.as_mut() {
                line.push_str(&format!(" {}", interface.alt_classes.len()));
                for class in &interface.alt_classes {
                    line.push_str(&format!(" {}", class));
                }
                line.push_str(if prohibited.is_some() { " 0" } else { " 1" });
            }
        }

        drop(config);

        if let Some(line) = line {
            self.interface_info.push(line);
        }

        true
    }

    /// Detach the kernel driver from a prohibited interface
    ///
    /// Returns true if a driver was detached.
    fn disable(&mut self, device: &E::Device, key: InterfaceKey, descriptor: Descriptor) -> bool {
        let mut handle = match device.open_handle() {
            Ok(handle) => handle,
            Err(e) => {
                debug!("Cannot open {:?} to detach: {}", key, e);
                return false;
            }
        };

        match handle.kernel_driver_active(key.interface) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                debug!("Cannot query driver of {:?}: {}", key, e);
                return false;
            }
        }

        match handle.detach_kernel_driver(key.interface) {
            Ok(()) => {
                info!("Detached kernel driver from {}", descriptor);
                self.forced_off.insert(key, descriptor);
                true
            }
            Err(e) => {
                debug!("Failed to detach kernel driver from {}: {}", descriptor, e);
                false
            }
        }
    }

    /// Hand a previously detached interface back to its kernel driver
    ///
    /// Returns true if a driver was attached.
    fn enable(&mut self, device: &E::Device, key: InterfaceKey) -> bool {
        let mut handle = match device.open_handle() {
            Ok(handle) => handle,
            Err(e) => {
                debug!("Cannot open {:?} to reattach: {}", key, e);
                return false;
            }
        };

        match handle.kernel_driver_active(key.interface) {
            Ok(false) => {}
            Ok(true) => {
                // someone else already rebound it
                debug!("{:?} already has a kernel driver", key);
                self.forced_off.remove(&key);
                return false;
            }
            Err(e) => {
                debug!("Cannot query driver of {:?}: {}", key, e);
                return false;
            }
        }

        match handle.attach_kernel_driver(key.interface) {
            Ok(()) => {
                if let Some(descriptor) = self.forced_off.remove(&key) {
                    info!("Reattached kernel driver to {}", descriptor);
                }
                true
            }
            Err(e) => {
                debug!("Failed to reattach kernel driver to {:?}: {}", key, e);
                false
            }
        }
    }
}

/// Read (product, manufacturer) through one transient handle
///
/// Anything that cannot be read becomes [`UNDEFINED_STRING`].
fn read_strings<D: UsbDevice>(device: &D, identity: &DeviceIdentity) -> (String, String) {
    let handle = match device.open_handle() {
        Ok(handle) => handle,
        Err(e) => {
            debug!(
                "Cannot open {:04x}:{:04x} to read strings: {}",
                identity.vendor_id, identity.product_id, e
            );
            return (UNDEFINED_STRING.to_string(), UNDEFINED_STRING.to_string());
        }
    };

    (
        read_string(&handle, identity.product_index),
        read_string(&handle, identity.manufacturer_index),
    )
}

fn read_string<H: DriverHandle>(handle: &H, index: Option<u8>) -> String {
    let value = index
        .and_then(|index| handle.read_string_ascii(index).ok())
        .map(|mut value| {
            if value.len() >= STRING_BUFFER_SIZE {
                let mut end = STRING_BUFFER_SIZE - 1;
                while !value.is_char_boundary(end) {
                    end -= 1;
                }
                value.truncate(end);
            }
            value
        })
        .filter(|value| !value.is_empty());

    escape_device_string(value.as_deref().unwrap_or(UNDEFINED_STRING))
}
