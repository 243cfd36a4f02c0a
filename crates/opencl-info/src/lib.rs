//! Device discovery and compilation contract for the OpenCL language server.
//!
//! The server core never talks to a platform driver directly; it goes through
//! the [`Compiler`] trait defined here. This crate also owns the device value
//! model (stable fingerprints, power ranking) and a small registry that caches
//! the discovered device list.

pub mod compiler;
pub mod device;
pub mod registry;

use std::fmt;

use log::warn;
use serde_json::json;

pub use compiler::{Compiler, MockCompiler, UnavailableCompiler};
pub use device::{power_index, Device, DeviceIdentity};
pub use registry::DeviceRegistry;

/// Faults a gateway implementation can surface to the server core.
///
/// A failed kernel *build* is not an error: the build log is the product the
/// server is after. These variants cover the driver itself misbehaving or a
/// compile being attempted with no device at hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No OpenCL driver could be reached at all.
    DriverUnavailable,
    /// A compilation was requested while no device is selected.
    DeviceMissing,
    /// The driver failed for a reason other than a build failure.
    Compiler(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DriverUnavailable => write!(f, "no OpenCL driver is available"),
            Error::DeviceMissing => write!(f, "missing OpenCL device"),
            Error::Compiler(reason) => write!(f, "OpenCL compiler failure: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

/// Device dump for the `clinfo` subcommand.
///
/// Driver failures degrade to an empty list so the dump is usable on machines
/// without compatible hardware.
pub fn devices_json(compiler: &dyn Compiler) -> serde_json::Value {
    let devices = compiler.list_devices().unwrap_or_else(|err| {
        warn!("Failed to enumerate devices: {}", err);
        Vec::new()
    });
    json!({ "devices": devices })
}
