//! Zmodem engine: header-driven, escape-armored streaming with
//! windowed data subpackets, crash recovery, and attention sequences.

pub mod attention;
mod receiver;
mod sender;

pub use receiver::receive_batch;
pub use sender::send_batch;
pub use crate::ymodem::QueuedFile;

use std::time::Duration;

use crate::error::{Result, TransferError};
use crate::frame::zmodem_codec::{self, Encoding, Frame, Header};
use crate::wire::{Channel, TimedPort};

use attention::CancelDetector;

/// Scans for the next header's `ZPAD [ZPAD] ZDLE` preamble, reporting a
/// remote cancel if 5 consecutive `CAN` bytes arrive first, then decodes
/// the header that follows.
pub(crate) fn await_header<P: TimedPort>(
    channel: &mut Channel<P>,
    timeout: Duration,
) -> Result<Header> {
    let mut detector = CancelDetector::default();
    loop {
        let b = channel.read_byte(timeout)?;
        if detector.observe(b) {
            return Err(TransferError::RemoteCancel);
        }
        if b == zmodem_codec::ZPAD {
            break;
        }
    }
    let mut b = channel.read_byte(timeout)?;
    if b == zmodem_codec::ZPAD {
        b = channel.read_byte(timeout)?;
    }
    if b != zmodem_codec::ZDLE {
        return Err(TransferError::Integrity("expected ZDLE after ZPAD".into()));
    }
    Header::read(channel, timeout)
}

/// Builds a 32-bit-CRC header for a data-adjacent frame.
pub(crate) fn data_header(frame: Frame, count: u32) -> Header {
    Header::new(Encoding::ZBIN32, frame, count.to_le_bytes())
}

pub(crate) fn control_header(frame: Frame, count: u32) -> Header {
    Header::new(Encoding::ZHEX, frame, count.to_le_bytes())
}

/// Sends `request`, retrying on timeout up to `retries` times, and returns
/// the next header received in response.
pub(crate) fn send_and_await_header<P: TimedPort>(
    channel: &mut Channel<P>,
    request: Header,
    retries: u32,
    timeout: Duration,
) -> Result<Header> {
    for _ in 0..retries.max(1) {
        request.write(channel)?;
        channel.flush()?;
        match await_header(channel, timeout) {
            Ok(h) => return Ok(h),
            Err(TransferError::Timeout(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(TransferError::Timeout(
        "peer never replied to a zmodem header".into(),
    ))
}
