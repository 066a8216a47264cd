//! Xmodem sender state machine.

use std::time::Duration;

use log::{debug, warn};

use super::codec::encode_block;
use super::control::{ACK, CAN, EOT, NAK};
use super::{block_size, is_streaming};
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::local_file::LocalFile;
use crate::session::{Session, SessionHandle, SessionState};
use crate::wire::{Channel, TimedPort};

/// Sends a single file's worth of bytes read from `file` to an already
/// flavor-negotiated Xmodem receiver.
pub fn send<P, F>(
    channel: &mut Channel<P>,
    file: &mut F,
    session: &Session,
    handle: &SessionHandle,
    config: &TransferConfig,
) -> Result<()>
where
    P: TimedPort,
    F: LocalFile,
{
    let flavor = handle.flavor();
    let block_len = block_size(flavor);
    let streaming = is_streaming(flavor);
    let timeout = base_timeout(flavor, config);

    let use_crc = wait_for_handshake(channel, config, timeout)?;

    let mut seq: u8 = 1;
    let mut buf = vec![0u8; block_len];
    loop {
        if handle.is_cancel_requested() {
            send_cancel(channel)?;
            return Err(TransferError::LocalCancel);
        }

        let n = file
            .read(&mut buf)
            .map_err(|e| TransferError::File(e.to_string()))?;
        if n == 0 {
            return finish(channel, config, timeout).map(|()| {
                session.set_state(SessionState::FileDone);
            });
        }

        let block = encode_block(seq, &buf[..n], block_len, use_crc);
        send_block_with_retry(channel, &block, seq, streaming, config, timeout)?;

        session.record_bytes(n as u64);
        session.record_block();
        seq = seq.wrapping_add(1);
    }
}

fn send_block_with_retry<P: TimedPort>(
    channel: &mut Channel<P>,
    block: &[u8],
    seq: u8,
    streaming: bool,
    config: &TransferConfig,
    timeout: Duration,
) -> Result<()> {
    let mut errors = 0u32;
    loop {
        channel.write(block)?;
        channel.flush()?;

        if streaming {
            // 1K-G: stream without waiting for an ACK.
            return Ok(());
        }

        match channel.read_byte(timeout) {
            Ok(ACK) => return Ok(()),
            Ok(CAN) => {
                if channel.read_byte(timeout) == Ok(CAN) {
                    return Err(TransferError::RemoteCancel);
                }
            }
            Ok(_) | Err(_) => {}
        }

        errors += 1;
        warn!("xmodem: block {seq} not acked, retry {errors}");
        if errors >= config.xmodem_max_block_errors {
            send_cancel(channel)?;
            return Err(TransferError::Protocol(format!(
                "block {seq} exceeded retry budget"
            )));
        }
    }
}

/// Waits for the receiver's handshake byte ('C'/'G'/`NAK`), returning
/// whether CRC mode was requested.
fn wait_for_handshake<P: TimedPort>(
    channel: &mut Channel<P>,
    config: &TransferConfig,
    timeout: Duration,
) -> Result<bool> {
    let mut cancels = 0u32;
    for _ in 0..config.xmodem_handshake_retries.max(1) * 4 {
        match channel.read_byte(timeout) {
            Ok(super::control::C) | Ok(super::control::G) => return Ok(true),
            Ok(NAK) => return Ok(false),
            Ok(CAN) => {
                cancels += 1;
                if cancels >= 2 {
                    return Err(TransferError::RemoteCancel);
                }
            }
            Ok(other) => debug!("xmodem: ignoring byte {other:#04x} while waiting for handshake"),
            Err(_) => {}
        }
    }
    Err(TransferError::Timeout("peer never sent a handshake byte".into()))
}

fn finish<P: TimedPort>(
    channel: &mut Channel<P>,
    config: &TransferConfig,
    timeout: Duration,
) -> Result<()> {
    for attempt in 0..config.xmodem_max_block_errors {
        channel.write_byte(EOT)?;
        channel.flush()?;
        match channel.read_byte(timeout) {
            Ok(ACK) => return Ok(()),
            Ok(NAK) => {
                // Some receivers NAK the first EOT before ACKing the second.
                debug!("xmodem: EOT attempt {attempt} NAKed, resending");
                continue;
            }
            _ => continue,
        }
    }
    Err(TransferError::Protocol("peer never acked EOT".into()))
}

fn send_cancel<P: TimedPort>(channel: &mut Channel<P>) -> Result<()> {
    channel.write(&[CAN, CAN, CAN])?;
    channel.flush()?;
    Ok(())
}

fn base_timeout(flavor: crate::session::Flavor, config: &TransferConfig) -> Duration {
    if flavor == crate::session::Flavor::XmodemRelaxed {
        config.xmodem_relaxed_timeout
    } else {
        config.xmodem_timeout
    }
}
