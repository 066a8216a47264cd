//! Xmodem engine: sender and receiver state machines for
//! `VANILLA`/`RELAXED`/`CRC`/`X_1K`/`X_1K_G`.

pub mod codec;
mod receiver;
mod sender;

pub use receiver::receive;
pub use sender::send;

/// Control bytes.
pub mod control {
    pub const SOH: u8 = 0x01;
    pub const STX: u8 = 0x02;
    pub const EOT: u8 = 0x04;
    pub const ACK: u8 = 0x06;
    pub const NAK: u8 = 0x15;
    pub const CAN: u8 = 0x18;
    pub const C: u8 = b'C';
    pub const G: u8 = b'G';
    /// Legacy CP/M pad byte used to fill a short last block.
    pub const CPMEOF: u8 = 0x1A;
}

use crate::session::Flavor;

/// Whether `flavor` uses CRC-16 rather than the 8-bit checksum.
#[must_use]
pub fn uses_crc(flavor: Flavor) -> bool {
    !matches!(flavor, Flavor::XmodemVanilla | Flavor::XmodemRelaxed)
}

/// The block payload size for `flavor`.
#[must_use]
pub fn block_size(flavor: Flavor) -> usize {
    flavor.fixed_block_size().unwrap_or(128)
}

/// Whether `flavor` streams blocks without waiting for a per-block `ACK`.
#[must_use]
pub fn is_streaming(flavor: Flavor) -> bool {
    flavor.is_streaming()
}
