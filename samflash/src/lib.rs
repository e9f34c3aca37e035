//! # samflash
//!
//! A library for flashing ATSAMD21-family chips over the SAM-BA monitor
//! protocol.
//!
//! This crate provides the core functionality for talking to the SAM-BA
//! bootloader found on Arduino Zero/MKR, Adafruit M0 and similar boards:
//!
//! - SAM-BA command/response client (binary and text modes)
//! - Chip identification from the DSU DID register
//! - NVMCTRL row erase and page programming with progress reporting
//! - 1200-baud touch reset and bootloader port re-discovery
//!
//! ## Supported Chips
//!
//! - SAMD21, SAMR21, SAML21 (programming)
//! - SAMD51 (identification and geometry only)
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use samflash::{FirmwareImage, FlashOutcome, LogObserver, NoSelection, Session, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("blink.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut session = Session::new(samflash::NativePortProvider, SessionConfig::default());
//!         match session.flash(Some("/dev/ttyACM0"), &image, &mut NoSelection, &mut LogObserver)? {
//!             FlashOutcome::Flashed { device, bytes } => println!("Wrote {bytes} bytes to {device}"),
//!             FlashOutcome::Cancelled => println!("Cancelled"),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod discovery;
pub mod error;
pub mod observer;
pub mod port;
pub mod protocol;
pub mod reset;
pub mod session;
pub mod target;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). The flash
/// engine consults it between rows and pages.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Fail with [`Error::Interrupted`] if interruption was requested.
pub(crate) fn check_interrupted() -> Result<()> {
    if is_interrupted_requested() {
        return Err(Error::Interrupted);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortProvider};
pub use {
    discovery::{BoardVendor, DetectedPort, default_allow_list, detect_ports, format_port_list},
    error::{DeviceError, Error, FlashError, ProtocolError, Result},
    observer::{LogObserver, NullObserver, Observer},
    port::{Port, PortInfo, PortProvider, SerialConfig},
    protocol::{ProtocolMode, SambaClient},
    reset::{NoSelection, PortSelector, TouchConfig, discover_bootloader_port, reset_to_bootloader},
    session::{FirmwareImage, FlashOutcome, Session, SessionConfig},
    target::{Device, DeviceFamily, DeviceId, FlashDescriptor, Flasher, PollConfig},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_toggle() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
        assert!(check_interrupted().is_ok());

        test_set_interrupted(true);
        assert!(is_interrupted_requested());
        assert!(matches!(check_interrupted(), Err(Error::Interrupted)));

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
