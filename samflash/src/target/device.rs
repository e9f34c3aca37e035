//! Device identification.

use {
    super::{
        chip::{DSU_DID_ADDR, DeviceFamily, DeviceId, FlashDescriptor},
        samd21::nvm,
    },
    crate::{
        error::{DeviceError, Result},
        port::Port,
        protocol::SambaClient,
    },
    log::{debug, info, warn},
    std::fmt,
};

/// A resolved chip on the current connection.
///
/// Never reused across connections; a different board may be attached next
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Device {
    id: DeviceId,
    family: DeviceFamily,
    flash: FlashDescriptor,
}

impl Device {
    /// Read the DID register and resolve it through the family table.
    ///
    /// Programmable families take their flash size from NVMCTRL PARAM, since
    /// one series spans several flash sizes. The table geometry is kept when
    /// PARAM is empty or reports a different page size.
    pub fn identify<P: Port>(client: &mut SambaClient<P>) -> Result<Self> {
        let raw = client.read_word(DSU_DID_ADDR)?;
        let id = DeviceId(raw);
        debug!(
            "DID {id}: processor {}, family {}, series {}, devsel {:#04x}",
            id.processor(),
            id.family(),
            id.series(),
            id.devsel()
        );

        let mut device = Self::from_id(id)?;
        if device.family.is_programmable() {
            match nvm::read_geometry(client)? {
                Some(flash) if flash.page_size == device.flash.page_size => device.flash = flash,
                Some(flash) => warn!(
                    "Ignoring NVMCTRL geometry ({} byte pages), expected {} byte pages",
                    flash.page_size, device.flash.page_size
                ),
                None => debug!("NVMCTRL PARAM is empty, using table geometry"),
            }
        }
        info!("Identified {device}");
        Ok(device)
    }

    /// Resolve a raw DID value without talking to the chip.
    pub fn from_id(id: DeviceId) -> Result<Self> {
        let family = DeviceFamily::from_device_id(id);
        let flash = family
            .flash_descriptor()
            .ok_or(DeviceError::Unsupported {
                device_id: id.0,
            })?;
        Ok(Self {
            id,
            family,
            flash,
        })
    }

    /// Raw identification register.
    pub fn device_id(&self) -> DeviceId {
        self.id
    }

    /// Resolved family.
    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    /// Die revision letter.
    pub fn revision(&self) -> char {
        self.id
            .revision_letter()
    }

    /// Flash geometry.
    pub fn flash_descriptor(&self) -> FlashDescriptor {
        self.flash
    }

    /// First byte usable by the application.
    pub fn application_offset(&self) -> u32 {
        self.family
            .application_offset()
    }

    /// Bytes available from `offset` (relative to the application start) to
    /// the end of flash.
    pub fn available(&self, offset: u32) -> u32 {
        self.flash
            .total_size
            .saturating_sub(self.application_offset())
            .saturating_sub(offset)
    }

    /// Jump to the application. The device drops off the bus afterwards.
    pub fn start_application<P: Port>(&self, client: &mut SambaClient<P>) -> Result<()> {
        let addr = self.application_offset();
        info!("Starting application at {addr:#010x}");
        client.go(addr)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rev {} (DID {}), {} KiB flash",
            self.family,
            self.revision(),
            self.id,
            self.flash.total_size / 1024
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_from_id_samd21() {
        let device = Device::from_id(DeviceId(0x1001_0305)).unwrap();
        assert_eq!(device.family(), DeviceFamily::Samd21);
        assert_eq!(device.application_offset(), 0x2000);
        assert_eq!(device.available(0), 253_952);
        assert_eq!(device.available(0x100), 253_696);
        assert_eq!(device.revision(), 'D');
        assert_eq!(
            device.to_string(),
            "SAMD21 rev D (DID 0x10010305), 256 KiB flash"
        );
    }

    #[test]
    fn test_from_id_unmapped() {
        let err = Device::from_id(DeviceId(0x0BAD_C0DE)).unwrap_err();
        assert!(matches!(
            err,
            Error::Device(DeviceError::Unsupported {
                device_id: 0x0BAD_C0DE
            })
        ));
    }

    #[test]
    fn test_available_saturates() {
        let device = Device::from_id(DeviceId(0x1001_0305)).unwrap();
        assert_eq!(device.available(u32::MAX), 0);
    }
}
