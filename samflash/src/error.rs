//! Error types for samflash.

use std::io;
use thiserror::Error;

/// Result type for samflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the SAM-BA command/response link.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No valid response arrived within the response window.
    ///
    /// On `connect` this is the primary signal that the port is not a
    /// bootloader at all.
    #[error("Device not responding to {what} (not in bootloader mode?)")]
    Unresponsive {
        /// The command that went unanswered.
        what: String,
    },

    /// A response arrived but did not have the expected frame shape.
    #[error("Malformed response: expected {expected}, got {got:?}")]
    Malformed {
        /// Description of the expected frame.
        expected: &'static str,
        /// The bytes actually received, lossily decoded.
        got: String,
    },
}

/// Failures while resolving the attached chip.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The identification register matched no known family.
    #[error("Device not supported (DID {device_id:#010x})")]
    Unsupported {
        /// Raw DSU DID register value.
        device_id: u32,
    },

    /// The family is known for geometry lookup only and cannot be programmed.
    #[error("{family} is recognized but flashing it is not supported")]
    GeometryOnly {
        /// Display name of the family.
        family: String,
    },

    /// An operation needed an identified device but none was resolved.
    #[error("No device identified on this connection")]
    NotIdentified,
}

/// Failures of the flash engine.
#[derive(Debug, Error)]
pub enum FlashError {
    /// The controller never reported ready after a row erase.
    #[error("Erase timed out at {address:#010x}")]
    EraseTimeout {
        /// Row address being erased.
        address: u32,
    },

    /// The controller never reported ready after a page write.
    #[error("Page write timed out at {address:#010x}")]
    WriteTimeout {
        /// Page address being written.
        address: u32,
    },

    /// The image does not fit above the bootloader region.
    #[error("Image too large: {size} bytes, {available} bytes available")]
    ImageTooLarge {
        /// Image length in bytes.
        size: u32,
        /// Bytes available from the requested offset to the end of flash.
        available: u32,
    },

    /// There is nothing to write.
    #[error("Image is empty")]
    EmptyImage,

    /// The address lies inside the resident bootloader region.
    #[error("Address {address:#010x} is below the application start {start:#010x}")]
    ProtectedRegion {
        /// Offending address.
        address: u32,
        /// First address usable by the application.
        start: u32,
    },

    /// The offset is not aligned to the required erase/write unit.
    #[error("Offset {offset:#010x} is not aligned to {alignment} bytes")]
    UnalignedOffset {
        /// Requested offset.
        offset: u32,
        /// Required alignment in bytes.
        alignment: u32,
    },

    /// The controller flagged a programming, lock or NVM error.
    #[error("Flash controller error (STATUS {status:#06x})")]
    Controller {
        /// Raw controller STATUS register value.
        status: u32,
    },

    /// Read-back data differs from what was written.
    #[error("Verification failed at {address:#010x}")]
    VerifyMismatch {
        /// First differing address.
        address: u32,
    },
}

/// Error type for samflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Monitor protocol error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Device identification error.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Flash engine error.
    #[error(transparent)]
    Flash(#[from] FlashError),

    /// The operator declined a port selection prompt.
    #[error("Cancelled by user")]
    UserCancelled,

    /// The embedding application requested the operation to stop.
    #[error("Interrupted")]
    Interrupted,

    /// No usable serial port was found.
    #[error("No serial port found")]
    PortNotFound,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the link went away underneath us.
    ///
    /// After `start_application` the device re-enumerates as the user
    /// application, so this condition is the expected terminal state.
    pub fn is_link_closed(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            #[cfg(feature = "native")]
            Self::Serial(e) => e.kind() == serialport::ErrorKind::NoDevice,
            _ => false,
        }
    }

    /// Whether this error is the "not in bootloader mode" signal.
    pub fn is_unresponsive(&self) -> bool {
        matches!(self, Self::Protocol(ProtocolError::Unresponsive { .. }))
    }
}
