//! Protocol implementations.

pub mod samba;

// Re-export common types
pub use samba::{
    Command, DEFAULT_BAUD, HANDSHAKE_TIMEOUT, MAX_BLOCK_SIZE, ProtocolMode, RESPONSE_TIMEOUT,
    SambaClient,
};
