//! Ymodem batch receiver.
//!
//! Layered directly on the Xmodem-1K/G block format: block 0 carries
//! `Block0Meta` instead of file data, an all-zero block 0 ends the batch,
//! and each file's data blocks are received exactly like Xmodem-1K/G.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};

use super::block0::Block0Meta;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::local_file::{LocalFileSystem, OpenMode};
use crate::session::{FileInfo, Session, SessionHandle, SessionState};
use crate::wire::{Channel, TimedPort};
use crate::xmodem::codec::{payload_size_for_marker, trailer_len, verify_trailer};
use crate::xmodem::control::{ACK, CAN, EOT, G, NAK};

const BLOCK_LEN: usize = 1024;
const HANDSHAKE_INTERVAL: Duration = Duration::from_secs(3);

/// Receives a whole batch of files into `fs`, driven by block-0 metadata
/// blocks, stopping at the end-of-batch marker.
pub fn receive_batch<P, FS>(
    channel: &mut Channel<P>,
    fs: &FS,
    session: &Session,
    handle: &SessionHandle,
    config: &TransferConfig,
) -> Result<()>
where
    P: TimedPort,
    FS: LocalFileSystem,
{
    let streaming = handle.flavor().is_streaming();
    let timeout = config.ymodem_timeout;

    loop {
        if handle.is_cancel_requested() {
            send_cancel(channel)?;
            return Err(TransferError::LocalCancel);
        }

        let meta = receive_block0(channel, streaming, config, timeout)?;
        if meta.is_end_of_batch() {
            info!("ymodem: end-of-batch block received");
            channel.write_byte(ACK)?;
            channel.flush()?;
            session.set_state(SessionState::End);
            return Ok(());
        }

        let path = PathBuf::from(&meta.name);
        let mut file = fs
            .open(&path, OpenMode::Write)
            .map_err(|e| TransferError::File(e.to_string()))?;

        let mut info = FileInfo::new(meta.name.clone(), path, BLOCK_LEN);
        info.size = Some(meta.size);
        info.mtime = meta.mtime_as_system_time();
        info.mode = meta.mode;
        session.begin_file(info);
        session.set_state(SessionState::Transfer);

        // Block 0 is already ACKed by `receive_block0`; request the data
        // blocks with a fresh handshake byte.
        request_data(channel, streaming, config, timeout)?;

        let received = receive_file_data(channel, &mut file, session, handle, config, timeout, streaming)?;
        if meta.size > 0 && received != meta.size {
            debug!(
                "ymodem: {} received {} bytes, declared size {}, truncating",
                meta.name, received, meta.size
            );
        }
        if meta.size > 0 {
            file.truncate(meta.size)
                .map_err(|e| TransferError::File(e.to_string()))?;
        }
        file.flush().map_err(|e| TransferError::File(e.to_string()))?;
        session.finish_current_file();
        session.set_state(SessionState::FileDone);

        // Ready for the next block 0 (or the end-of-batch marker).
        request_data(channel, streaming, config, timeout)?;
    }
}

fn receive_block0<P: TimedPort>(
    channel: &mut Channel<P>,
    streaming: bool,
    config: &TransferConfig,
    timeout: Duration,
) -> Result<Block0Meta> {
    let byte = if streaming { G } else { crate::xmodem::control::C };
    for attempt in 0..config.ymodem_max_block_errors {
        channel.write_byte(byte)?;
        channel.flush()?;
        match channel.read_byte(HANDSHAKE_INTERVAL) {
            Ok(marker) if payload_size_for_marker(marker).is_some() => {
                let mut header = [0u8; 2];
                channel.read_n(&mut header, timeout)?;
                let mut payload = vec![0u8; BLOCK_LEN];
                channel.read_n(&mut payload, timeout)?;
                let mut trailer = vec![0u8; trailer_len(true)];
                channel.read_n(&mut trailer, timeout)?;
                if header[0] ^ header[1] != 0xFF || !verify_trailer(&payload, &trailer, true) {
                    warn!("ymodem: corrupt block 0 on attempt {attempt}, retrying");
                    channel.write_byte(NAK)?;
                    channel.flush()?;
                    continue;
                }
                channel.write_byte(ACK)?;
                channel.flush()?;
                return Ok(Block0Meta::decode(&payload));
            }
            Ok(CAN) => {
                return Err(TransferError::RemoteCancel);
            }
            _ => {
                warn!("ymodem: no block 0 on attempt {attempt}, retrying handshake");
            }
        }
    }
    Err(TransferError::Timeout("peer never sent block 0".into()))
}

fn request_data<P: TimedPort>(
    channel: &mut Channel<P>,
    streaming: bool,
    config: &TransferConfig,
    timeout: Duration,
) -> Result<()> {
    let byte = if streaming { G } else { crate::xmodem::control::C };
    for attempt in 0..config.ymodem_max_block_errors {
        channel.write_byte(byte)?;
        channel.flush()?;
        match channel.read_byte(timeout) {
            Ok(_marker) => return Ok(()),
            Err(_) => debug!("ymodem: data request attempt {attempt} unanswered"),
        }
    }
    Err(TransferError::Timeout("peer never answered data request".into()))
}

#[allow(clippy::too_many_arguments)]
fn receive_file_data<P, F>(
    channel: &mut Channel<P>,
    file: &mut F,
    session: &Session,
    handle: &SessionHandle,
    config: &TransferConfig,
    timeout: Duration,
    streaming: bool,
) -> Result<u64>
where
    P: TimedPort,
    F: crate::local_file::LocalFile,
{
    let mut expected_seq: u8 = 1;
    let mut consecutive_errors = 0u32;
    let mut total = 0u64;
    let mut pending_marker: Option<u8> = None;

    loop {
        if handle.is_cancel_requested() {
            send_cancel(channel)?;
            return Err(TransferError::LocalCancel);
        }

        let marker = match pending_marker.take() {
            Some(b) => Ok(b),
            None => channel.read_byte(timeout),
        };
        let marker = match marker {
            Ok(b) => b,
            Err(_) => {
                consecutive_errors += 1;
                if consecutive_errors >= config.ymodem_max_block_errors {
                    send_cancel(channel)?;
                    return Err(TransferError::Protocol(
                        "exceeded retry budget waiting for a ymodem block".into(),
                    ));
                }
                channel.write_byte(NAK)?;
                channel.flush()?;
                continue;
            }
        };

        if marker == EOT {
            channel.write_byte(NAK)?;
            channel.flush()?;
            if channel.read_byte(timeout)? == EOT {
                channel.write_byte(ACK)?;
                channel.flush()?;
            }
            return Ok(total);
        }

        let Some(_len) = payload_size_for_marker(marker) else {
            consecutive_errors += 1;
            channel.write_byte(NAK)?;
            channel.flush()?;
            continue;
        };

        let mut header = [0u8; 2];
        channel.read_n(&mut header, timeout)?;
        let mut payload = vec![0u8; BLOCK_LEN];
        channel.read_n(&mut payload, timeout)?;
        let mut trailer = vec![0u8; trailer_len(true)];
        channel.read_n(&mut trailer, timeout)?;

        let seq_ok = header[0] ^ header[1] == 0xFF;
        let integrity_ok = seq_ok && verify_trailer(&payload, &trailer, true);

        if !integrity_ok {
            consecutive_errors += 1;
            session.record_file_error();
            if streaming {
                // Y_G is NAK-free by design: abort on a mid-transfer CRC error
                // rather than retrying.
                send_cancel(channel)?;
                return Err(TransferError::Integrity(
                    "ymodem-g block failed CRC, aborting".into(),
                ));
            }
            if consecutive_errors >= config.ymodem_max_block_errors {
                send_cancel(channel)?;
                return Err(TransferError::Protocol(
                    "exceeded retry budget on bad ymodem block".into(),
                ));
            }
            channel.write_byte(NAK)?;
            channel.flush()?;
            continue;
        }
        consecutive_errors = 0;

        if header[0] == expected_seq {
            file.write_all(&payload)
                .map_err(|e| TransferError::File(e.to_string()))?;
            total += payload.len() as u64;
            session.record_bytes(payload.len() as u64);
            session.record_block();
            expected_seq = expected_seq.wrapping_add(1);
            if !streaming {
                channel.write_byte(ACK)?;
                channel.flush()?;
            }
        } else if header[0] == expected_seq.wrapping_sub(1) {
            if !streaming {
                channel.write_byte(ACK)?;
                channel.flush()?;
            }
        } else {
            send_cancel(channel)?;
            return Err(TransferError::Protocol(format!(
                "unexpected ymodem block sequence {}, expected {expected_seq}",
                header[0]
            )));
        }
    }
}

fn send_cancel<P: TimedPort>(channel: &mut Channel<P>) -> Result<()> {
    channel.write(&[CAN, CAN, CAN])?;
    channel.flush()?;
    Ok(())
}
