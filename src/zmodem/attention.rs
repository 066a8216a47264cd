//! Zmodem attention/cancel sequence.

use crate::error::Result;
use crate::frame::zmodem_codec::CAN;
use crate::wire::{Channel, TimedPort};

const BACKSPACE: u8 = 0x08;

/// Injects 8×`CAN` followed by 8×backspace, bypassing `ZDLE` escaping
/// entirely, as the reference implementations do.
pub fn send_attention<P: TimedPort>(channel: &mut Channel<P>) -> Result<()> {
    for _ in 0..8 {
        channel.write_byte(CAN)?;
    }
    for _ in 0..8 {
        channel.write_byte(BACKSPACE)?;
    }
    channel.flush()?;
    Ok(())
}

/// Counts consecutive `CAN` bytes seen while scanning the wire for the
/// next header preamble; five in a row is a remote-cancel request.
#[derive(Default)]
pub struct CancelDetector {
    consecutive: u32,
}

impl CancelDetector {
    /// Feeds one observed byte, returning `true` once the run reaches 5.
    pub fn observe(&mut self, byte: u8) -> bool {
        if byte == CAN {
            self.consecutive += 1;
        } else {
            self.consecutive = 0;
        }
        self.consecutive >= 5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_cans_in_a_row_trip_the_detector() {
        let mut detector = CancelDetector::default();
        for _ in 0..4 {
            assert!(!detector.observe(CAN));
        }
        assert!(detector.observe(CAN));
    }

    #[test]
    fn a_non_can_byte_resets_the_run() {
        let mut detector = CancelDetector::default();
        for _ in 0..4 {
            detector.observe(CAN);
        }
        assert!(!detector.observe(b'*'));
        assert!(!detector.observe(CAN));
    }
}
