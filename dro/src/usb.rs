//! libusb transport for the DRO vendor interface.
//!
//! The firmware exposes a single vendor-class interface with one bulk OUT and
//! one bulk IN endpoint (64-byte packets). Opening follows the usual sequence:
//!
//! 1. Find the device by vendor/product id
//! 2. Detach any kernel driver from the interface (Linux only)
//! 3. Set the active configuration
//! 4. Claim the interface
//!
//! The interface is released when the [`UsbTransport`] is dropped, so every
//! exit path of a session, including error returns, gives the device back.

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, UsbContext};
use tracing::{debug, info};

use crate::error::{DroError, DroResult};
use crate::profile::DeviceProfile;
use crate::transport::Transport;

/// Timeout for string descriptor reads during setup.
const DESCRIPTOR_TIMEOUT: Duration = Duration::from_millis(500);

/// Map a libusb error raised during session setup.
fn setup_error(e: rusb::Error) -> DroError {
    match e {
        rusb::Error::Access => DroError::AccessDenied(e.to_string()),
        rusb::Error::NoDevice | rusb::Error::NotFound => {
            DroError::Setup(format!("{e} (device disconnected?)"))
        }
        rusb::Error::Busy => {
            DroError::Setup(format!("{e} (interface claimed by another process?)"))
        }
        other => DroError::Setup(other.to_string()),
    }
}

/// Map a libusb error raised during a transfer.
fn transfer_error(e: rusb::Error) -> DroError {
    match e {
        rusb::Error::Timeout => DroError::Timeout,
        other => DroError::Channel(other.to_string()),
    }
}

/// libusb has no "zero timeout"; zero means wait forever.
fn nonzero(timeout: Duration) -> Duration {
    timeout.max(Duration::from_millis(1))
}

/// Open, claimed handle to a DRO.
pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    interface: u8,
    endpoint_in: u8,
    endpoint_out: u8,
    serial: Option<String>,
}

impl UsbTransport {
    /// Open the first attached device matching the profile's vendor/product id.
    ///
    /// # Errors
    ///
    /// - [`DroError::DeviceNotFound`] if nothing matches
    /// - [`DroError::AccessDenied`] if the OS refuses to open the device
    /// - [`DroError::Setup`] if configuration or interface claim fails
    pub fn open(profile: &DeviceProfile) -> DroResult<Self> {
        let context = Context::new().map_err(setup_error)?;
        let devices = context.devices().map_err(setup_error)?;

        for device in devices.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            if desc.vendor_id() == profile.vendor_id && desc.product_id() == profile.product_id {
                debug!(
                    "Found {:04X}:{:04X} on bus {:03} device {:03}",
                    profile.vendor_id,
                    profile.product_id,
                    device.bus_number(),
                    device.address()
                );
                return Self::open_device(&device, profile);
            }
        }

        Err(DroError::DeviceNotFound {
            vendor_id: profile.vendor_id,
            product_id: profile.product_id,
        })
    }

    fn open_device(device: &Device<Context>, profile: &DeviceProfile) -> DroResult<Self> {
        let mut handle = device.open().map_err(setup_error)?;

        let serial = device
            .device_descriptor()
            .ok()
            .and_then(|desc| desc.serial_number_string_index())
            .and_then(|index| handle.read_string_descriptor_ascii(index).ok());

        #[cfg(target_os = "linux")]
        {
            if handle
                .kernel_driver_active(profile.interface)
                .unwrap_or(false)
            {
                debug!("Detaching kernel driver from interface {}", profile.interface);
                if let Err(e) = handle.detach_kernel_driver(profile.interface) {
                    tracing::warn!("Failed to detach kernel driver: {}", e);
                }
            }
        }

        if let Err(e) = handle.set_active_configuration(1) {
            debug!("Failed to set configuration (may already be set): {}", e);
        }

        handle
            .claim_interface(profile.interface)
            .map_err(setup_error)?;

        info!(
            "Opened {} DRO, serial {}",
            profile.name,
            serial.as_deref().unwrap_or("unknown")
        );

        Ok(Self {
            handle,
            interface: profile.interface,
            endpoint_in: profile.endpoint_in,
            endpoint_out: profile.endpoint_out,
            serial,
        })
    }

    /// Serial number string descriptor, if the device reported one.
    ///
    /// Recent firmware encodes the build in it, e.g. `4ENC-1a2b3c4-20250114`.
    pub fn serial_number(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Product string descriptor.
    pub fn product(&self) -> Option<String> {
        let desc = self.handle.device().device_descriptor().ok()?;
        let languages = self.handle.read_languages(DESCRIPTOR_TIMEOUT).ok()?;
        let language = *languages.first()?;
        self.handle
            .read_product_string(language, &desc, DESCRIPTOR_TIMEOUT)
            .ok()
    }
}

impl Transport for UsbTransport {
    fn write(&mut self, data: &[u8], timeout: Duration) -> DroResult<usize> {
        self.handle
            .write_bulk(self.endpoint_out, data, nonzero(timeout))
            .map_err(transfer_error)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> DroResult<usize> {
        self.handle
            .read_bulk(self.endpoint_in, buf, nonzero(timeout))
            .map_err(transfer_error)
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            debug!("Failed to release USB interface: {}", e);
        }
        debug!("DRO interface {} released", self.interface);
    }
}
