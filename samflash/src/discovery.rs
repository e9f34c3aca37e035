//! Port discovery and classification utilities.
//!
//! Classification is inferred purely from bus metadata (USB VID/PID). No
//! protocol traffic is exchanged here; a port is only confirmed to be a
//! bootloader once [`SambaClient::connect`](crate::SambaClient::connect)
//! succeeds against it.

use {
    crate::{
        error::Result,
        port::{PortInfo, PortProvider},
    },
    log::{debug, trace},
};

/// Known vendors of boards that ship a SAM-BA capable bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum BoardVendor {
    /// Arduino (Zero, MKR family, Nano 33 IoT).
    Arduino,
    /// Adafruit (Feather M0, Metro M0, Trinket M0).
    Adafruit,
    /// SparkFun (SAMD21 Mini/Dev breakouts, RedBoard Turbo).
    SparkFun,
    /// Seeed Studio (XIAO SAMD21, Wio Lite).
    Seeed,
    /// Microchip/Atmel native USB (Xplained boards).
    Microchip,
    /// Unknown vendor.
    Unknown,
}

/// Vendor IDs of bootloader-capable boards.
pub const BOOTLOADER_VIDS: &[(u16, BoardVendor)] = &[
    (0x2341, BoardVendor::Arduino),
    (0x239A, BoardVendor::Adafruit),
    (0x1B4F, BoardVendor::SparkFun),
    (0x2886, BoardVendor::Seeed),
    (0x03EB, BoardVendor::Microchip),
];

/// Default vendor-ID allow-list used when looking for a bootloader port.
pub fn default_allow_list() -> Vec<u16> {
    BOOTLOADER_VIDS
        .iter()
        .map(|(vid, _)| *vid)
        .collect()
}

impl BoardVendor {
    /// Classify a USB vendor ID.
    #[must_use]
    pub fn from_vid(vid: u16) -> Self {
        BOOTLOADER_VIDS
            .iter()
            .find(|(known, _)| *known == vid)
            .map_or(Self::Unknown, |(_, vendor)| *vendor)
    }

    /// Get a human-readable name for the vendor.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Arduino => "Arduino",
            Self::Adafruit => "Adafruit",
            Self::SparkFun => "SparkFun",
            Self::Seeed => "Seeed",
            Self::Microchip => "Microchip",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known vendor.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Discovered port with its classification.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified board vendor.
    pub vendor: BoardVendor,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl From<PortInfo> for DetectedPort {
    fn from(info: PortInfo) -> Self {
        let vendor = info
            .vid
            .map_or(BoardVendor::Unknown, BoardVendor::from_vid);
        Self {
            name: info.name,
            vendor,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        }
    }
}

impl DetectedPort {
    /// Whether the port's vendor is in `allow_list`.
    pub fn is_allowed(&self, allow_list: &[u16]) -> bool {
        self.vid
            .is_some_and(|vid| allow_list.contains(&vid))
    }
}

/// Detect all ports visible through `provider`.
pub fn detect_ports<P: PortProvider>(provider: &mut P) -> Result<Vec<DetectedPort>> {
    let ports = provider.list_ports()?;
    let detected: Vec<DetectedPort> = ports
        .into_iter()
        .map(DetectedPort::from)
        .collect();

    for port in &detected {
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            trace!(
                "Found USB port: {} (VID: {vid:04X}, PID: {pid:04X}, Vendor: {:?})",
                port.name, port.vendor
            );
        }
    }
    debug!("Detected {} serial port(s)", detected.len());

    Ok(detected)
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let vendor_info = if port.vendor.is_known() {
                format!(" [{}]", port.vendor.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name, vendor_info, product_info)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, vid: Option<u16>, pid: Option<u16>) -> DetectedPort {
        DetectedPort::from(PortInfo {
            name: name.to_string(),
            vid,
            pid,
            ..Default::default()
        })
    }

    #[test]
    fn test_vendor_from_vid() {
        assert_eq!(BoardVendor::from_vid(0x2341), BoardVendor::Arduino);
        assert_eq!(BoardVendor::from_vid(0x239A), BoardVendor::Adafruit);
        assert_eq!(BoardVendor::from_vid(0x1B4F), BoardVendor::SparkFun);
        assert_eq!(BoardVendor::from_vid(0x2886), BoardVendor::Seeed);
        assert_eq!(BoardVendor::from_vid(0x03EB), BoardVendor::Microchip);
        assert_eq!(BoardVendor::from_vid(0x1A86), BoardVendor::Unknown);
    }

    #[test]
    fn test_default_allow_list_has_no_duplicates() {
        let mut list = default_allow_list();
        let len = list.len();
        list.sort_unstable();
        list.dedup();
        assert_eq!(list.len(), len);
    }

    #[test]
    fn test_is_allowed() {
        let allow = default_allow_list();
        assert!(port("/dev/ttyACM0", Some(0x2341), Some(0x004D)).is_allowed(&allow));
        assert!(!port("/dev/ttyUSB0", Some(0x1A86), Some(0x7523)).is_allowed(&allow));
        assert!(!port("/dev/ttyS0", None, None).is_allowed(&allow));
        assert!(port("/dev/ttyUSB0", Some(0x1A86), Some(0x7523)).is_allowed(&[0x1A86]));
    }

    #[test]
    fn test_format_port_list() {
        let mut known = port("/dev/ttyACM0", Some(0x239A), Some(0x000B));
        known.product = Some("Feather M0".to_string());
        let ports = vec![
            known,
            port("/dev/ttyUSB1", Some(0x1234), Some(0x5678)),
            port("/dev/ttyS0", None, None),
        ];

        let formatted = format_port_list(&ports);
        assert_eq!(formatted[0], "/dev/ttyACM0 [Adafruit] - Feather M0");
        assert_eq!(formatted[1], "/dev/ttyUSB1 [VID:1234 PID:5678]");
        assert_eq!(formatted[2], "/dev/ttyS0");
    }
}
