//! Chip family table and flash geometry.
//!
//! Families are resolved from the DSU device identification register (DID).
//! The upper half-word carries processor, family and series; the low byte
//! (DEVSEL) separates die variants that share a series.
//!
//! ```text
//!  31   28 27     23 22 21    16 15  12 11   8 7        0
//! +-------+---------+--+--------+------+------+----------+
//! | PROC  | FAMILY  |  | SERIES | DIE  | REV  |  DEVSEL  |
//! +-------+---------+--+--------+------+------+----------+
//! ```

use std::{fmt, ops::RangeInclusive};

/// Address of the DSU DID register.
pub const DSU_DID_ADDR: u32 = 0x4100_2018;

/// Pages per erase row on NVMCTRL parts.
pub const PAGES_PER_ROW: u32 = 4;

/// Supported chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceFamily {
    /// SAMD21 (Cortex-M0+, USB).
    Samd21,
    /// SAMR21 (SAMD21 with an integrated 2.4 GHz radio).
    Samr21,
    /// SAML21 (low-power Cortex-M0+).
    Saml21,
    /// SAMD51 (Cortex-M4F). Geometry lookup only.
    Samd51,
    /// Identification register matched nothing.
    #[default]
    Unknown,
}

/// Flash geometry of a resolved device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FlashDescriptor {
    /// Write granularity in bytes.
    pub page_size: u32,
    /// Number of pages.
    pub num_pages: u32,
    /// Total flash size in bytes.
    pub total_size: u32,
}

impl FlashDescriptor {
    /// Build a descriptor; the total is always derived from the page count.
    #[must_use]
    pub const fn new(page_size: u32, num_pages: u32) -> Self {
        Self {
            page_size,
            num_pages,
            total_size: page_size * num_pages,
        }
    }

    /// Erase granularity in bytes.
    #[must_use]
    pub const fn row_size(&self) -> u32 {
        self.page_size * PAGES_PER_ROW
    }

    /// Round `len` up to a whole number of rows.
    #[must_use]
    pub fn align_to_row(&self, len: u32) -> u32 {
        len.div_ceil(self.row_size()) * self.row_size()
    }
}

const SAMD21_FLASH: FlashDescriptor = FlashDescriptor::new(64, 4096);
const SAMD51_FLASH: FlashDescriptor = FlashDescriptor::new(512, 1024);

/// One row of the family table.
struct FamilyEntry {
    /// DID bits 31:16 (processor, family, series).
    code: u16,
    /// DEVSEL values covered by this entry.
    devsel: RangeInclusive<u8>,
    family: DeviceFamily,
}

/// Known families keyed by DID signature.
///
/// SAMR21 parts report the SAMD21 series code and are told apart by DEVSEL.
static FAMILY_TABLE: &[FamilyEntry] = &[
    FamilyEntry {
        code: 0x1001,
        devsel: 0x00..=0x18,
        family: DeviceFamily::Samd21,
    },
    FamilyEntry {
        code: 0x1001,
        devsel: 0x19..=0x1E,
        family: DeviceFamily::Samr21,
    },
    FamilyEntry {
        code: 0x1001,
        devsel: 0x1F..=0xFF,
        family: DeviceFamily::Samd21,
    },
    FamilyEntry {
        code: 0x1081,
        devsel: 0x00..=0xFF,
        family: DeviceFamily::Saml21,
    },
    FamilyEntry {
        code: 0x6006,
        devsel: 0x00..=0xFF,
        family: DeviceFamily::Samd51,
    },
];

impl DeviceFamily {
    /// All concrete families.
    pub const ALL: [Self; 4] = [Self::Samd21, Self::Samr21, Self::Saml21, Self::Samd51];

    /// Resolve a family from a raw DID value.
    #[must_use]
    pub fn from_device_id(id: DeviceId) -> Self {
        FAMILY_TABLE
            .iter()
            .find(|entry| entry.code == id.signature() && entry.devsel.contains(&id.devsel()))
            .map_or(Self::Unknown, |entry| entry.family)
    }

    /// Flash geometry, if the family is known.
    #[must_use]
    pub fn flash_descriptor(&self) -> Option<FlashDescriptor> {
        match self {
            Self::Samd21 | Self::Samr21 | Self::Saml21 => Some(SAMD21_FLASH),
            Self::Samd51 => Some(SAMD51_FLASH),
            Self::Unknown => None,
        }
    }

    /// Size of the resident bootloader region.
    ///
    /// Application code starts here, and so does `start_application`.
    #[must_use]
    pub fn application_offset(&self) -> u32 {
        match self {
            Self::Samd21 | Self::Samr21 | Self::Saml21 => 0x2000,
            Self::Samd51 => 0x4000,
            Self::Unknown => 0,
        }
    }

    /// Whether the flash engine can program this family.
    pub fn is_programmable(&self) -> bool {
        matches!(self, Self::Samd21 | Self::Samr21 | Self::Saml21)
    }

    /// Get the chip family from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "samd21" | "atsamd21" | "d21" => Some(Self::Samd21),
            "samr21" | "atsamr21" | "r21" => Some(Self::Samr21),
            "saml21" | "atsaml21" | "l21" => Some(Self::Saml21),
            "samd51" | "atsamd51" | "d51" => Some(Self::Samd51),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Samd21 => write!(f, "SAMD21"),
            Self::Samr21 => write!(f, "SAMR21"),
            Self::Saml21 => write!(f, "SAML21"),
            Self::Samd51 => write!(f, "SAMD51"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Raw DSU DID register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Processor code (bits 31:28).
    pub fn processor(self) -> u8 {
        ((self.0 >> 28) & 0xF) as u8
    }

    /// Family code (bits 27:23).
    pub fn family(self) -> u8 {
        ((self.0 >> 23) & 0x1F) as u8
    }

    /// Series code (bits 21:16).
    pub fn series(self) -> u8 {
        ((self.0 >> 16) & 0x3F) as u8
    }

    /// Die number (bits 15:12).
    pub fn die(self) -> u8 {
        ((self.0 >> 12) & 0xF) as u8
    }

    /// Die revision (bits 11:8).
    pub fn revision(self) -> u8 {
        ((self.0 >> 8) & 0xF) as u8
    }

    /// Revision as the letter printed in datasheets (0 = 'A').
    pub fn revision_letter(self) -> char {
        char::from(b'A' + self.revision())
    }

    /// Device variant selector (bits 7:0).
    pub fn devsel(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Processor, family and series as stored in bits 31:16.
    pub fn signature(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
