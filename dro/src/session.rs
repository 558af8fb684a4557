//! Backend selection for the binaries.

use tracing::info;

use crate::error::{DroError, DroResult};
use crate::profile::DeviceProfile;
use crate::sampler::PositionSampler;
use crate::sim::SimulatedDro;
use crate::transport::Transport;

/// Where the byte channel comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Attached device over libusb
    Usb,
    /// In-process firmware emulator
    Simulated,
}

/// An open session with its device identity.
pub struct Connection {
    pub sampler: PositionSampler<Box<dyn Transport>>,
    pub serial: Option<String>,
    pub product: Option<String>,
}

impl Connection {
    /// Open `backend` using `profile`.
    ///
    /// The profile is validated first, so a malformed profile file never
    /// reaches the device.
    pub fn open(profile: DeviceProfile, backend: Backend) -> DroResult<Self> {
        profile.validate()?;
        match backend {
            Backend::Simulated => {
                info!("Using simulated {} DRO", profile.name);
                let product = format!("Simulated DRO ({})", profile.name);
                let transport: Box<dyn Transport> = Box::new(SimulatedDro::new(profile.clone()));
                Ok(Self {
                    sampler: PositionSampler::new(transport, profile),
                    serial: Some("SIMULATED".to_string()),
                    product: Some(product),
                })
            }
            Backend::Usb => Self::open_usb(profile),
        }
    }

    #[cfg(feature = "usb")]
    fn open_usb(profile: DeviceProfile) -> DroResult<Self> {
        let usb = crate::usb::UsbTransport::open(&profile)?;
        let serial = usb.serial_number().map(str::to_string);
        let product = usb.product();
        let transport: Box<dyn Transport> = Box::new(usb);
        Ok(Self {
            sampler: PositionSampler::new(transport, profile),
            serial,
            product,
        })
    }

    #[cfg(not(feature = "usb"))]
    fn open_usb(_profile: DeviceProfile) -> DroResult<Self> {
        Err(DroError::Setup(
            "built without the `usb` feature; use --simulate".to_string(),
        ))
    }
}

/// Pick the backend from the `--simulate` flag.
pub fn backend_for(simulate: bool) -> Backend {
    if simulate {
        Backend::Simulated
    } else {
        Backend::Usb
    }
}

/// Print-ready message for a failure to open a session.
pub fn describe_setup_failure(error: &DroError) -> String {
    match error.remediation() {
        Some(steps) => format!("{error}\n\nTroubleshooting tips:\n{steps}"),
        None => error.to_string(),
    }
}
