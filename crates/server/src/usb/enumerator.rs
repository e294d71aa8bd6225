//! libusb backed device enumeration

use super::Enumerator;
use rusb::{Context, Device, UsbContext};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum EnumeratorError {
    #[error("failed to initialize USB context: {0}")]
    Init(rusb::Error),

    #[error("USB context not initialized")]
    NotInitialized,

    #[error("failed to list USB devices: {0}")]
    List(rusb::Error),
}

/// Enumerator over the host's USB devices
///
/// The snapshot holds one reference per device and is declared before the
/// context so it is released first on drop.
#[derive(Default)]
pub struct UsbEnumerator {
    snapshot: Vec<Device<Context>>,
    cursor: usize,
    context: Option<Context>,
}

impl UsbEnumerator {
    /// Enumerator without a context; call [`UsbEnumerator::init`] before scanning
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the libusb context
    ///
    /// Calling it again after a success is a no-op.
    pub fn init(&mut self) -> Result<(), EnumeratorError> {
        if self.context.is_none() {
            let context = Context::new().map_err(EnumeratorError::Init)?;
            info!("USB context initialized");
            self.context = Some(context);
        }
        Ok(())
    }
}

impl Enumerator for UsbEnumerator {
    type Device = Device<Context>;

    fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    fn scan(&mut self) -> Result<usize, EnumeratorError> {
        self.snapshot.clear();
        self.cursor = 0;

        let context = self
            .context
            .as_ref()
            .ok_or(EnumeratorError::NotInitialized)?;
        let list = context.devices().map_err(EnumeratorError::List)?;
        self.snapshot = list.iter().collect();

        debug!("Scanned {} USB device(s)", self.snapshot.len());
        Ok(self.snapshot.len())
    }

    fn next_device(&mut self) -> Option<Self::Device> {
        let device = self.snapshot.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(device)
    }
}
