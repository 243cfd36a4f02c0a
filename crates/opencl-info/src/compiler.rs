//! The gateway contract between the server core and a platform driver.

use mockall::automock;

use crate::device::Device;
use crate::Error;

/// Abstracts the compute driver: enumerate devices, build kernel source.
///
/// Implementations are expected to walk every platform and every device type
/// the driver exposes, and to key their native handles by the device
/// fingerprint so [`compile`](Compiler::compile) can find its way back from a
/// [`Device`] value.
#[automock]
pub trait Compiler {
    /// Enumerates all devices across all platforms.
    fn list_devices(&self) -> Result<Vec<Device>, Error>;

    /// Builds `source` for `device` and returns the compiler's build log.
    ///
    /// A build failure is the normal case this server exists for and yields
    /// `Ok` with the log describing it. `Err` is reserved for the driver
    /// misbehaving. If retrieving the log itself fails after a build, the
    /// implementation degrades to an empty log rather than an error.
    fn compile(&self, device: &Device, source: &str, options: &str) -> Result<String, Error>;
}

/// Gateway for builds without a platform driver bound in.
///
/// Every call reports [`Error::DriverUnavailable`]; the session keeps running
/// and diagnostics requests surface the missing device.
pub struct UnavailableCompiler;

impl Compiler for UnavailableCompiler {
    fn list_devices(&self) -> Result<Vec<Device>, Error> {
        Err(Error::DriverUnavailable)
    }

    fn compile(&self, _device: &Device, _source: &str, _options: &str) -> Result<String, Error> {
        Err(Error::DriverUnavailable)
    }
}
