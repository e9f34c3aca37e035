//! SAMD21-family (SAMD21, SAMR21, SAML21) flash support.

pub mod flasher;
pub mod nvm;

pub use flasher::{DEFAULT_MAX_POLLS, Flasher, PollConfig};
