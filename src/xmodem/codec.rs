//! Pure Xmodem block encode/decode.
//!
//! `SOH|STX` + seq + `~seq` + data(128|1024) + checksum(1) | crc16(2).

use super::control::{CPMEOF, SOH, STX};
use crate::frame::checksum::{checksum8, crc16_ccitt};

/// An encoded block ready to write to the wire.
#[must_use]
pub fn encode_block(seq: u8, payload: &[u8], block_size: usize, use_crc: bool) -> Vec<u8> {
    let mut block = Vec::with_capacity(3 + block_size + 2);
    block.push(if block_size > 128 { STX } else { SOH });
    block.push(seq);
    block.push(!seq);
    block.extend_from_slice(payload);
    block.resize(3 + block_size, CPMEOF);
    if use_crc {
        let crc = crc16_ccitt(&block[3..3 + block_size]);
        block.push((crc >> 8) as u8);
        block.push((crc & 0xff) as u8);
    } else {
        block.push(checksum8(&block[3..3 + block_size]));
    }
    block
}

/// Verifies payload against its trailing checksum/CRC.
#[must_use]
pub fn verify_trailer(payload: &[u8], trailer: &[u8], use_crc: bool) -> bool {
    if use_crc {
        trailer.len() == 2 && {
            let crc = crc16_ccitt(payload);
            trailer[0] == (crc >> 8) as u8 && trailer[1] == (crc & 0xff) as u8
        }
    } else {
        trailer.len() == 1 && trailer[0] == checksum8(payload)
    }
}

/// The number of trailer bytes for the given integrity mode.
#[must_use]
pub fn trailer_len(use_crc: bool) -> usize {
    if use_crc {
        2
    } else {
        1
    }
}

/// Decodes a block's size in bytes from its leading `SOH`/`STX` byte.
#[must_use]
pub fn payload_size_for_marker(marker: u8) -> Option<usize> {
    match marker {
        SOH => Some(128),
        STX => Some(1024),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_checksum() {
        let block = encode_block(1, b"hello", 128, false);
        assert_eq!(block[0], SOH);
        assert_eq!(block[1], 1);
        assert_eq!(block[2], 0xFE);
        let payload = &block[3..3 + 128];
        assert!(payload.starts_with(b"hello"));
        assert!(payload[5..].iter().all(|&b| b == CPMEOF));
        assert!(verify_trailer(payload, &block[3 + 128..], false));
    }

    #[test]
    fn round_trips_with_crc() {
        let block = encode_block(7, &[0xAAu8; 1024], 1024, true);
        assert_eq!(block[0], STX);
        let payload = &block[3..3 + 1024];
        assert!(verify_trailer(payload, &block[3 + 1024..], true));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let mut block = encode_block(1, b"hello", 128, true);
        block[10] ^= 0xFF;
        let payload = &block[3..3 + 128];
        assert!(!verify_trailer(payload, &block[3 + 128..], true));
    }
}
