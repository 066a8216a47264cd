//! Pure, stateless integrity functions. No I/O, fully fuzzable.

use crc::{Crc, CRC_16_XMODEM, CRC_32_ISO_HDLC};

/// CRC-16/CCITT as used by Xmodem-CRC and Ymodem: polynomial `0x1021`,
/// initial value `0x0000`, MSB-first, no reflection, no final XOR. The
/// `crc` crate's `CRC_16_XMODEM` constant is exactly this variant.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Zmodem's 32-bit CRC: polynomial `0xEDB88320` reflected, initial
/// `0xFFFFFFFF`, final XOR `0xFFFFFFFF` (the common "CRC-32/ISO-HDLC").
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// 8-bit additive checksum used by plain (non-CRC) Xmodem.
#[must_use]
pub fn checksum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// CRC-16/CCITT over `data`, big-endian on the wire.
#[must_use]
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Zmodem's 32-bit CRC, little-endian on the wire.
#[must_use]
pub fn crc32_zmodem(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Standard CRC reference vectors: `"123456789" -> 0x29B1 / 0xCBF43926`.
    #[test]
    fn crc16_reference_vector() {
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn crc32_reference_vector() {
        assert_eq!(crc32_zmodem(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn checksum8_wraps() {
        assert_eq!(checksum8(&[0xFF, 0x02]), 0x01);
    }

    #[test]
    fn checksum8_empty_is_zero() {
        assert_eq!(checksum8(&[]), 0);
    }
}
