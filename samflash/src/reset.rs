//! Bootloader entry via the 1200-baud touch, and re-discovery afterwards.
//!
//! Arduino-style SAMD cores watch the CDC line state. Opening the port at
//! 1200 baud and dropping DTR makes the running sketch reset into the
//! bootloader, which then enumerates again, often under a new port name.

use {
    crate::{
        discovery::{DetectedPort, detect_ports},
        error::{Error, Result},
        port::{Port, PortProvider, SerialConfig},
    },
    log::{debug, info, warn},
    std::{thread, time::Duration},
};

/// Baud rate recognized by the application-side reset handler.
pub const TOUCH_BAUD: u32 = 1200;

/// Timing of the touch sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchConfig {
    /// Baud rate the port is opened at.
    pub baud: u32,
    /// Delay after each DTR transition.
    pub signal_delay: Duration,
    /// Wait after closing, for the bootloader to enumerate.
    pub settle: Duration,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            baud: TOUCH_BAUD,
            signal_delay: Duration::from_millis(100),
            settle: Duration::from_secs(2),
        }
    }
}

/// Perform the 1200-baud touch on `port_name`.
///
/// Best effort. Returns `false` when the port could not be opened at the
/// touch baud rate, which usually means the device is already sitting in
/// its bootloader. Never fails.
pub fn reset_to_bootloader<P: PortProvider>(
    provider: &mut P,
    port_name: &str,
    config: &TouchConfig,
) -> bool {
    info!("Requesting bootloader on {port_name} ({} baud touch)", config.baud);

    let serial = SerialConfig::new(port_name, config.baud);
    let mut port = match provider.open(&serial) {
        Ok(port) => port,
        Err(e) => {
            warn!("Could not open {port_name} at {} baud: {e}", config.baud);
            return false;
        },
    };

    for level in [false, true, false] {
        if let Err(e) = port.set_dtr(level) {
            // The board may already be resetting and gone from the bus.
            warn!("Failed to set DTR on {port_name}: {e}");
            break;
        }
        thread::sleep(config.signal_delay);
    }

    if let Err(e) = port.close() {
        warn!("Failed to close {port_name} after touch: {e}");
    }
    drop(port);

    debug!("Waiting {:?} for re-enumeration", config.settle);
    thread::sleep(config.settle);
    true
}

/// Manual port selection, used when no port matches the allow-list.
pub trait PortSelector {
    /// Pick one of `candidates`, or `None` to cancel.
    fn select(&mut self, candidates: &[DetectedPort]) -> Result<Option<DetectedPort>>;
}

impl<F> PortSelector for F
where
    F: FnMut(&[DetectedPort]) -> Result<Option<DetectedPort>>,
{
    fn select(&mut self, candidates: &[DetectedPort]) -> Result<Option<DetectedPort>> {
        self(candidates)
    }
}

/// Selector that always declines. Suits non-interactive use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSelection;

impl PortSelector for NoSelection {
    fn select(&mut self, _candidates: &[DetectedPort]) -> Result<Option<DetectedPort>> {
        Ok(None)
    }
}

/// Locate the bootloader port from bus metadata alone.
///
/// Returns the first port whose vendor is in `allow_list`. Otherwise the
/// `selector` chooses among every visible port; declining yields
/// [`Error::UserCancelled`].
pub fn discover_bootloader_port<P, S>(
    provider: &mut P,
    allow_list: &[u16],
    selector: &mut S,
) -> Result<DetectedPort>
where
    P: PortProvider,
    S: PortSelector + ?Sized,
{
    let ports = detect_ports(provider)?;

    if let Some(port) = ports
        .iter()
        .find(|p| p.is_allowed(allow_list))
    {
        info!("Found bootloader candidate {} ({})", port.name, port.vendor.name());
        return Ok(port.clone());
    }

    if ports.is_empty() {
        return Err(Error::PortNotFound);
    }

    debug!("No port matches the allow-list, asking for a manual choice");
    selector
        .select(&ports)?
        .ok_or(Error::UserCancelled)
}
