//! Chip/target abstraction.
//!
//! [`chip`] holds the static family table, [`device`] resolves the attached
//! chip over SAM-BA, and [`samd21`] programs it.

pub mod chip;
pub mod device;
pub mod samd21;

pub use {
    chip::{DSU_DID_ADDR, DeviceFamily, DeviceId, FlashDescriptor, PAGES_PER_ROW},
    device::Device,
    samd21::{Flasher, PollConfig},
};
