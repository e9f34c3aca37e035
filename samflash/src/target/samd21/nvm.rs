//! NVMCTRL register access.
//!
//! ## Register Map
//!
//! ```text
//! +--------+----------+------------------------------------------+
//! | Offset | Register | Fields used                              |
//! +--------+----------+------------------------------------------+
//! | 0x00   | CTRLA    | CMDEX key 0xA5 (15:8), CMD (6:0)         |
//! | 0x04   | CTRLB    | MANW (7)                                 |
//! | 0x08   | PARAM    | PSZ page size (18:16), NVMP (15:0)       |
//! | 0x14   | INTFLAG  | READY (0), ERROR (1)                     |
//! | 0x18   | STATUS   | PROGE (2), LOCKE (3), NVME (4); W1C      |
//! | 0x1C   | ADDR     | address in 16-bit units                  |
//! +--------+----------+------------------------------------------+
//! ```

use {
    crate::{error::Result, port::Port, protocol::SambaClient, target::FlashDescriptor},
    log::trace,
    std::{thread, time::Duration},
};

/// NVMCTRL peripheral base.
pub const NVMCTRL_BASE: u32 = 0x4100_4000;

/// Command register.
pub const CTRLA: u32 = NVMCTRL_BASE;
/// Control register B.
pub const CTRLB: u32 = NVMCTRL_BASE + 0x04;
/// NVM parameter register.
pub const PARAM: u32 = NVMCTRL_BASE + 0x08;
/// Interrupt flag register.
pub const INTFLAG: u32 = NVMCTRL_BASE + 0x14;
/// Status register.
pub const STATUS: u32 = NVMCTRL_BASE + 0x18;
/// Address register.
pub const ADDR: u32 = NVMCTRL_BASE + 0x1C;

/// PARAM page count field.
const PARAM_NVMP_MASK: u32 = 0xFFFF;
/// PARAM page size field position; the page is `8 << PSZ` bytes.
const PARAM_PSZ_SHIFT: u32 = 16;

/// Execution key required in CTRLA bits 15:8.
pub const CMDEX_KEY: u32 = 0xA500;

/// Manual page write enable.
pub const CTRLB_MANW: u32 = 1 << 7;

/// Controller ready for a new command.
pub const INTFLAG_READY: u32 = 1 << 0;
/// A command finished with an error.
pub const INTFLAG_ERROR: u32 = 1 << 1;

/// Programming error.
pub const STATUS_PROGE: u32 = 1 << 2;
/// Lock error.
pub const STATUS_LOCKE: u32 = 1 << 3;
/// NVM error.
pub const STATUS_NVME: u32 = 1 << 4;
/// All error bits.
pub const STATUS_ERRORS: u32 = STATUS_PROGE | STATUS_LOCKE | STATUS_NVME;

/// Controller commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NvmCommand {
    /// Erase the row addressed by ADDR.
    EraseRow = 0x02,
    /// Commit the page buffer to the page addressed by ADDR.
    WritePage = 0x04,
    /// Reset the page buffer to 0xFF.
    PageBufferClear = 0x44,
}

impl NvmCommand {
    /// CTRLA value executing this command.
    #[must_use]
    pub fn ctrla(self) -> u32 {
        CMDEX_KEY | u32::from(self as u8)
    }
}

/// Outcome of a bounded ready poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ready {
    /// READY set, no error flagged.
    Ok,
    /// READY set with ERROR flagged; carries STATUS.
    Failed(u32),
    /// Budget exhausted.
    TimedOut,
}

/// Issue a controller command.
pub fn command<P: Port>(client: &mut SambaClient<P>, cmd: NvmCommand) -> Result<()> {
    trace!("NVMCTRL {cmd:?}");
    client.write_word(CTRLA, cmd.ctrla())
}

/// Load ADDR with a byte address.
pub fn set_address<P: Port>(client: &mut SambaClient<P>, byte_addr: u32) -> Result<()> {
    client.write_word(ADDR, byte_addr >> 1)
}

/// Clear latched STATUS error bits.
pub fn clear_errors<P: Port>(client: &mut SambaClient<P>) -> Result<()> {
    client.write_word(STATUS, STATUS_ERRORS)
}

/// Switch the controller to manual page writes.
pub fn enable_manual_write<P: Port>(client: &mut SambaClient<P>) -> Result<()> {
    let ctrlb = client.read_word(CTRLB)?;
    if ctrlb & CTRLB_MANW == 0 {
        client.write_word(CTRLB, ctrlb | CTRLB_MANW)?;
    }
    Ok(())
}

/// Poll INTFLAG.READY at most `max_polls` times.
pub fn wait_ready<P: Port>(
    client: &mut SambaClient<P>,
    max_polls: u32,
    interval: Duration,
) -> Result<Ready> {
    for poll in 0..max_polls {
        let flags = client.read_word(INTFLAG)?;
        if flags & INTFLAG_READY != 0 {
            trace!("NVMCTRL ready after {} poll(s)", poll + 1);
            if flags & INTFLAG_ERROR != 0 {
                let status = client.read_word(STATUS)?;
                return Ok(Ready::Failed(status));
            }
            return Ok(Ready::Ok);
        }
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
    Ok(Ready::TimedOut)
}

/// Decode PARAM into a flash geometry. `None` when no pages are reported.
pub fn geometry_from_param(param: u32) -> Option<FlashDescriptor> {
    let num_pages = param & PARAM_NVMP_MASK;
    if num_pages == 0 {
        return None;
    }
    let page_size = 8 << ((param >> PARAM_PSZ_SHIFT) & 0x7);
    Some(FlashDescriptor::new(page_size, num_pages))
}

/// Read the flash geometry the controller reports.
pub fn read_geometry<P: Port>(client: &mut SambaClient<P>) -> Result<Option<FlashDescriptor>> {
    let param = client.read_word(PARAM)?;
    trace!("NVMCTRL PARAM {param:#010x}");
    Ok(geometry_from_param(param))
}

/// Read latched STATUS error bits.
pub fn errors<P: Port>(client: &mut SambaClient<P>) -> Result<u32> {
    Ok(client.read_word(STATUS)? & STATUS_ERRORS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_values() {
        assert_eq!(NvmCommand::EraseRow.ctrla(), 0xA502);
        assert_eq!(NvmCommand::WritePage.ctrla(), 0xA504);
        assert_eq!(NvmCommand::PageBufferClear.ctrla(), 0xA544);
    }

    #[test]
    fn test_geometry_from_param() {
        // ATSAMD21G18: 4096 pages of 64 bytes.
        assert_eq!(geometry_from_param(0x0003_1000), Some(FlashDescriptor::new(64, 4096)));
        // ATSAMD21E15: 512 pages.
        assert_eq!(
            geometry_from_param(0x0003_0200).map(|g| g.total_size),
            Some(32 * 1024)
        );
        assert_eq!(geometry_from_param(0x0003_0000), None);
        assert_eq!(geometry_from_param(0), None);
    }

    #[test]
    fn test_register_addresses() {
        assert_eq!(PARAM, 0x4100_4008);
        assert_eq!(INTFLAG, 0x4100_4014);
        assert_eq!(STATUS, 0x4100_4018);
        assert_eq!(ADDR, 0x4100_401C);
    }
}
