//! USB subsystem
//!
//! The enforcement engine only needs a narrow slice of libusb: enumerate
//! devices, read their descriptors, and bind or unbind the kernel driver of an
//! interface. That slice is expressed as traits here so the engine can be
//! driven by [`rusb`] in production and by an in-memory bus in tests.
//!
//! All calls block; they run on the control thread (see [`worker`]).

pub mod enumerator;
pub mod worker;

#[cfg(test)]
pub(crate) mod fake;

pub use enumerator::{EnumeratorError, UsbEnumerator};
pub use worker::{ControlThread, spawn_control_worker};

use rusb::UsbContext;

/// Device descriptor fields the engine uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer_index: Option<u8>,
    pub product_index: Option<u8>,
}

/// One interface of the active configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceView {
    /// bInterfaceNumber
    pub number: u8,
    /// Interface class of every alternate setting, in order
    pub alt_classes: Vec<u8>,
}

/// Active configuration descriptor
///
/// Dropping it releases the descriptor.
pub trait ConfigView {
    fn interfaces(&self) -> Vec<InterfaceView>;
}

/// Open device handle
///
/// Dropping it closes the handle.
pub trait DriverHandle {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool>;
    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;
    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;
    fn read_string_ascii(&self, index: u8) -> rusb::Result<String>;
}

/// A device from the current snapshot
pub trait UsbDevice {
    type Config: ConfigView;
    type Handle: DriverHandle;

    fn bus_number(&self) -> u8;
    fn port_number(&self) -> u8;
    fn identity(&self) -> rusb::Result<DeviceIdentity>;
    fn active_config(&self) -> rusb::Result<Self::Config>;
    fn open_handle(&self) -> rusb::Result<Self::Handle>;
}

/// Owner of the USB context and the device snapshot
pub trait Enumerator {
    type Device: UsbDevice;

    /// Whether a context was acquired
    fn is_initialized(&self) -> bool;

    /// Release the previous snapshot, take a new one and rewind the cursor
    ///
    /// Returns the number of devices in the new snapshot.
    fn scan(&mut self) -> Result<usize, EnumeratorError>;

    /// Next device of the snapshot, `None` once exhausted
    fn next_device(&mut self) -> Option<Self::Device>;
}

impl ConfigView for rusb::ConfigDescriptor {
    fn interfaces(&self) -> Vec<InterfaceView> {
        rusb::ConfigDescriptor::interfaces(self)
            .map(|interface| InterfaceView {
                number: interface.number(),
                alt_classes: interface
                    .descriptors()
                    .map(|setting| setting.class_code())
                    .collect(),
            })
            .collect()
    }
}

impl<T: UsbContext> DriverHandle for rusb::DeviceHandle<T> {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        rusb::DeviceHandle::kernel_driver_active(self, interface)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::detach_kernel_driver(self, interface)
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::attach_kernel_driver(self, interface)
    }

    fn read_string_ascii(&self, index: u8) -> rusb::Result<String> {
        self.read_string_descriptor_ascii(index)
    }
}

impl<T: UsbContext> UsbDevice for rusb::Device<T> {
    type Config = rusb::ConfigDescriptor;
    type Handle = rusb::DeviceHandle<T>;

    fn bus_number(&self) -> u8 {
        rusb::Device::bus_number(self)
    }

    fn port_number(&self) -> u8 {
        rusb::Device::port_number(self)
    }

    fn identity(&self) -> rusb::Result<DeviceIdentity> {
        let descriptor = self.device_descriptor()?;
        Ok(DeviceIdentity {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            manufacturer_index: descriptor.manufacturer_string_index(),
            product_index: descriptor.product_string_index(),
        })
    }

    fn active_config(&self) -> rusb::Result<Self::Config> {
        self.active_config_descriptor()
    }

    fn open_handle(&self) -> rusb::Result<Self::Handle> {
        self.open()
    }
}
