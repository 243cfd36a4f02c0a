//! Caching layer over device enumeration.

use std::cell::RefCell;
use std::rc::Rc;

use log::warn;

use crate::compiler::Compiler;
use crate::device::Device;

/// Caches the discovered device list.
///
/// Enumeration walks every platform and can be slow, so the first successful
/// result is kept for the lifetime of the registry. A driver failure is not
/// cached: the next query asks the driver again.
pub struct DeviceRegistry {
    compiler: Rc<dyn Compiler>,
    cache: RefCell<Option<Vec<Device>>>,
}

impl DeviceRegistry {
    pub fn new(compiler: Rc<dyn Compiler>) -> DeviceRegistry {
        DeviceRegistry {
            compiler,
            cache: RefCell::new(None),
        }
    }

    /// The cached device list, enumerating on first use.
    ///
    /// Returns an empty list when the driver is unavailable.
    pub fn devices(&self) -> Vec<Device> {
        if let Some(devices) = self.cache.borrow().as_ref() {
            return devices.clone();
        }
        match self.compiler.list_devices() {
            Ok(devices) => {
                *self.cache.borrow_mut() = Some(devices.clone());
                devices
            }
            Err(err) => {
                warn!("No OpenCL devices were found, {}", err);
                Vec::new()
            }
        }
    }

    /// Drops the cache so the next query re-enumerates.
    pub fn refresh(&self) {
        *self.cache.borrow_mut() = None;
    }
}
