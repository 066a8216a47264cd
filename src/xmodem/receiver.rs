//! Xmodem receiver state machine.

use std::time::Duration;

use log::{debug, warn};

use super::codec::{payload_size_for_marker, trailer_len, verify_trailer};
use super::control::{ACK, CAN, EOT, NAK};
use super::{block_size, is_streaming, uses_crc};
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::local_file::LocalFile;
use crate::session::{Session, SessionHandle, SessionState};
use crate::wire::{Channel, TimedPort};

/// Receives a single file over an already-negotiated Xmodem channel,
/// writing its bytes to `file` and updating `session`/`handle` as it goes.
pub fn receive<P, F>(
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

    let mut use_crc = uses_crc(flavor);
    let mut pending_marker = Some(negotiate(channel, &mut use_crc, streaming, config)?);

    let mut expected_seq: u8 = 1;
    let mut consecutive_errors: u32 = 0;
    let mut cancels_seen: u32 = 0;

    loop {
        if handle.is_cancel_requested() {
            send_cancel(channel)?;
            return Err(TransferError::LocalCancel);
        }
        if session.millis_since_progress() > config.watchdog_window(timeout).as_millis() as u64
            && expected_seq != 1
        {
            send_cancel(channel)?;
            return Err(TransferError::Timeout("no progress within watchdog window".into()));
        }

        let marker = match pending_marker.take() {
            Some(b) => Ok(b),
            None => channel.read_byte(timeout),
        };
        let marker = match marker {
            Ok(b) => b,
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= config.xmodem_max_block_errors {
                    send_cancel(channel)?;
                    return Err(TransferError::Protocol(
                        "exceeded retry budget waiting for a block".into(),
                    ));
                }
                channel.write_byte(nak_or_crc(use_crc))?;
                channel.flush()?;
                warn!("xmodem: {e} waiting for block, retrying");
                continue;
            }
        };

        if marker == CAN {
            cancels_seen += 1;
            if cancels_seen >= 2 {
                return Err(TransferError::RemoteCancel);
            }
            continue;
        }
        cancels_seen = 0;

        if marker == EOT {
            // NAK once, then ACK on the second EOT.
            channel.write_byte(NAK)?;
            channel.flush()?;
            let second = channel.read_byte(timeout)?;
            if second == EOT {
                channel.write_byte(ACK)?;
                channel.flush()?;
            }
            session.set_state(SessionState::FileDone);
            return Ok(());
        }

        let Some(expected_len) = payload_size_for_marker(marker) else {
            consecutive_errors += 1;
            channel.write_byte(NAK)?;
            channel.flush()?;
            continue;
        };
        let _ = expected_len; // block_len is authoritative once negotiated

        let mut header = [0u8; 2];
        channel.read_n(&mut header, timeout)?;
        let (seq, seq_complement) = (header[0], header[1]);

        let mut payload = vec![0u8; block_len];
        channel.read_n(&mut payload, timeout)?;
        let mut trailer = vec![0u8; trailer_len(use_crc)];
        channel.read_n(&mut trailer, timeout)?;

        let seq_ok = seq ^ seq_complement == 0xFF;
        let integrity_ok = seq_ok && verify_trailer(&payload, &trailer, use_crc);

        if !seq_ok {
            // Garbled header: treat like a bad block, NAK and retry.
            consecutive_errors += 1;
            if consecutive_errors >= config.xmodem_max_block_errors {
                send_cancel(channel)?;
                return Err(TransferError::Protocol("too many malformed blocks".into()));
            }
            channel.write_byte(NAK)?;
            channel.flush()?;
            continue;
        }

        if !integrity_ok {
            consecutive_errors += 1;
            session.record_file_error();
            if consecutive_errors >= config.xmodem_max_block_errors {
                send_cancel(channel)?;
                return Err(TransferError::Protocol(
                    "exceeded retry budget on bad checksum/CRC".into(),
                ));
            }
            channel.write_byte(NAK)?;
            channel.flush()?;
            continue;
        }
        consecutive_errors = 0;

        if seq == expected_seq {
            // Writes the full (possibly CPMEOF-padded) block; pure Xmodem
            // has no other way to know the file's real length.
            file.write_all(&payload)
                .map_err(|e| TransferError::File(e.to_string()))?;
            session.record_bytes(payload.len() as u64);
            session.record_block();
            expected_seq = expected_seq.wrapping_add(1);
            if !streaming {
                channel.write_byte(ACK)?;
                channel.flush()?;
            }
        } else if seq == expected_seq.wrapping_sub(1) {
            // Duplicate after an ACK the sender didn't see.
            debug!("xmodem: duplicate block {seq}, re-acking without writing");
            if !streaming {
                channel.write_byte(ACK)?;
                channel.flush()?;
            }
        } else {
            send_cancel(channel)?;
            return Err(TransferError::Protocol(format!(
                "unexpected block sequence {seq}, expected {expected_seq}"
            )));
        }
    }
}

/// Sends the handshake byte (`G` for 1K-G, `C` for the other CRC flavors,
/// `NAK` otherwise) every 3s up to `xmodem_handshake_retries` tries,
/// returning the first byte of the sender's reply. CRC flavors that get
/// no reply at all fall back to `NAK`/checksum mode, flipping `*use_crc`.
fn negotiate<P: TimedPort>(
    channel: &mut Channel<P>,
    use_crc: &mut bool,
    streaming: bool,
    config: &TransferConfig,
) -> Result<u8> {
    const HANDSHAKE_INTERVAL: Duration = Duration::from_secs(3);

    for attempt in 0..config.xmodem_handshake_retries {
        channel.write_byte(handshake_byte(*use_crc, streaming))?;
        channel.flush()?;
        match channel.read_byte(HANDSHAKE_INTERVAL) {
            Ok(b) => return Ok(b),
            Err(_) => {
                debug!("xmodem: handshake attempt {attempt} got no reply");
            }
        }
    }

    if *use_crc && !streaming {
        warn!("xmodem: no reply to CRC handshake, falling back to checksum mode");
        *use_crc = false;
        return negotiate(channel, use_crc, streaming, config);
    }

    Err(TransferError::Timeout("peer did not respond to handshake".into()))
}

/// The byte sent while waiting for the sender's first block: `G` for the
/// streaming 1K-G flavor (which never falls back to checksum mode), `C`
/// or `NAK` otherwise.
fn handshake_byte(use_crc: bool, streaming: bool) -> u8 {
    if streaming {
        super::control::G
    } else {
        nak_or_crc(use_crc)
    }
}

fn nak_or_crc(use_crc: bool) -> u8 {
    if use_crc {
        super::control::C
    } else {
        NAK
    }
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

