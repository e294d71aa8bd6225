//! In-memory USB bus for driving the enforcement engine in tests
//!
//! Every configuration descriptor and handle handed out is counted while
//! alive, so tests can assert that nothing leaks on any path.

use super::{
    ConfigView, DeviceIdentity, DriverHandle, Enumerator, EnumeratorError, InterfaceView,
    UsbDevice,
};
use std::sync::{Arc, Mutex, MutexGuard};

pub const MANUFACTURER_INDEX: u8 = 1;
pub const PRODUCT_INDEX: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct FakeInterface {
    pub number: u8,
    pub alt_classes: Vec<u8>,
    pub driver_bound: bool,
    pub fail_detach: bool,
    pub fail_attach: bool,
}

impl FakeInterface {
    /// Interface with a bound kernel driver and a single setting
    pub fn bound(number: u8, class: u8) -> Self {
        Self {
            number,
            alt_classes: vec![class],
            driver_bound: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    pub bus: u8,
    pub port: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// `None` makes the string read fail
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub interfaces: Vec<FakeInterface>,
    pub fail_identity: bool,
    pub fail_config: bool,
    pub fail_open: bool,
}

impl FakeDevice {
    pub fn new(bus: u8, port: u8, vendor_id: u16, product_id: u16) -> Self {
        Self {
            bus,
            port,
            vendor_id,
            product_id,
            manufacturer: Some("Acme Corp".to_string()),
            product: Some("Widget".to_string()),
            ..Default::default()
        }
    }

    pub fn with_interface(mut self, interface: FakeInterface) -> Self {
        self.interfaces.push(interface);
        self
    }
}

/// Shared bus state and call counters
#[derive(Debug, Default)]
pub struct FakeBus {
    pub devices: Vec<FakeDevice>,
    pub scans: usize,
    pub opens: usize,
    pub detach_calls: usize,
    pub attach_calls: usize,
    pub live_configs: usize,
    pub live_handles: usize,
}

impl FakeBus {
    pub fn interface_mut(&mut self, device: usize, interface: u8) -> &mut FakeInterface {
        self.devices[device]
            .interfaces
            .iter_mut()
            .find(|i| i.number == interface)
            .unwrap()
    }
}

#[derive(Clone, Default)]
pub struct SharedBus(Arc<Mutex<FakeBus>>);

impl SharedBus {
    pub fn new(devices: Vec<FakeDevice>) -> Self {
        Self(Arc::new(Mutex::new(FakeBus {
            devices,
            ..Default::default()
        })))
    }

    pub fn lock(&self) -> MutexGuard<'_, FakeBus> {
        self.0.lock().unwrap()
    }

    pub fn enumerator(&self) -> FakeEnumerator {
        FakeEnumerator {
            bus: self.clone(),
            initialized: true,
            snapshot: Vec::new(),
            cursor: 0,
        }
    }
}

pub struct FakeEnumerator {
    bus: SharedBus,
    pub initialized: bool,
    snapshot: Vec<FakeDeviceRef>,
    cursor: usize,
}

impl Enumerator for FakeEnumerator {
    type Device = FakeDeviceRef;

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn scan(&mut self) -> Result<usize, EnumeratorError> {
        if !self.initialized {
            return Err(EnumeratorError::NotInitialized);
        }
        let mut bus = self.bus.lock();
        bus.scans += 1;
        self.snapshot = (0..bus.devices.len())
            .map(|index| FakeDeviceRef {
                bus: self.bus.clone(),
                index,
            })
            .collect();
        self.cursor = 0;
        Ok(self.snapshot.len())
    }

    fn next_device(&mut self) -> Option<FakeDeviceRef> {
        let device = self.snapshot.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(device)
    }
}

#[derive(Clone)]
pub struct FakeDeviceRef {
    bus: SharedBus,
    index: usize,
}

impl UsbDevice for FakeDeviceRef {
    type Config = FakeConfig;
    type Handle = FakeHandle;

    fn bus_number(&self) -> u8 {
        self.bus.lock().devices[self.index].bus
    }

    fn port_number(&self) -> u8 {
        self.bus.lock().devices[self.index].port
    }

    fn identity(&self) -> rusb::Result<DeviceIdentity> {
        let bus = self.bus.lock();
        let device = &bus.devices[self.index];
        if device.fail_identity {
            return Err(rusb::Error::Io);
        }
        Ok(DeviceIdentity {
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            manufacturer_index: Some(MANUFACTURER_INDEX),
            product_index: Some(PRODUCT_INDEX),
        })
    }

    fn active_config(&self) -> rusb::Result<FakeConfig> {
        let mut bus = self.bus.lock();
        if bus.devices[self.index].fail_config {
            return Err(rusb::Error::NotFound);
        }
        let interfaces = bus.devices[self.index]
            .interfaces
            .iter()
            .map(|i| InterfaceView {
                number: i.number,
                alt_classes: i.alt_classes.clone(),
            })
            .collect();
        bus.live_configs += 1;
        Ok(FakeConfig {
            bus: self.bus.clone(),
            interfaces,
        })
    }

    fn open_handle(&self) -> rusb::Result<FakeHandle> {
        let mut bus = self.bus.lock();
        if bus.devices[self.index].fail_open {
            return Err(rusb::Error::Access);
        }
        bus.opens += 1;
        bus.live_handles += 1;
        Ok(FakeHandle {
            bus: self.bus.clone(),
            index: self.index,
        })
    }
}

pub struct FakeConfig {
    bus: SharedBus,
    interfaces: Vec<InterfaceView>,
}

impl ConfigView for FakeConfig {
    fn interfaces(&self) -> Vec<InterfaceView> {
        self.interfaces.clone()
    }
}

impl Drop for FakeConfig {
    fn drop(&mut self) {
        self.bus.lock().live_configs -= 1;
    }
}

pub struct FakeHandle {
    bus: SharedBus,
    index: usize,
}

impl DriverHandle for FakeHandle {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        let mut bus = self.bus.lock();
        Ok(bus.interface_mut(self.index, interface).driver_bound)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        let mut bus = self.bus.lock();
        bus.detach_calls += 1;
        let state = bus.interface_mut(self.index, interface);
        if state.fail_detach {
            return Err(rusb::Error::Busy);
        }
        state.driver_bound = false;
        Ok(())
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        let mut bus = self.bus.lock();
        bus.attach_calls += 1;
        let state = bus.interface_mut(self.index, interface);
        if state.fail_attach {
            return Err(rusb::Error::Busy);
        }
        state.driver_bound = true;
        Ok(())
    }

    fn read_string_ascii(&self, index: u8) -> rusb::Result<String> {
        let bus = self.bus.lock();
        let device = &bus.devices[self.index];
        let value = match index {
            MANUFACTURER_INDEX => device.manufacturer.clone(),
            PRODUCT_INDEX => device.product.clone(),
            _ => None,
        };
        value.ok_or(rusb::Error::Io)
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.bus.lock().live_handles -= 1;
    }
}
