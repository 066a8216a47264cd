//! Ymodem batch sender.

use std::time::Duration;

use log::{debug, warn};

use super::block0::Block0Meta;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::local_file::LocalFile;
use crate::session::{FileInfo, Session, SessionHandle, SessionState};
use crate::wire::{Channel, TimedPort};
use crate::xmodem::codec::encode_block;
use crate::xmodem::control::{ACK, CAN, EOT, C, G, NAK};

const BLOCK_LEN: usize = 1024;

/// Describes one file queued for a Ymodem batch: its metadata and an
/// already-positioned-at-zero handle to read its bytes from.
pub struct QueuedFile<F> {
    pub meta: Block0Meta,
    pub file: F,
}

/// Sends a batch of files, each preceded by a block-0 metadata block,
/// followed by the all-zero end-of-batch block.
pub fn send_batch<P, F>(
    channel: &mut Channel<P>,
    files: &mut [QueuedFile<F>],
    session: &Session,
    handle: &SessionHandle,
    config: &TransferConfig,
) -> Result<()>
where
    P: TimedPort,
    F: LocalFile,
{
    let streaming = handle.flavor().is_streaming();
    let timeout = config.ymodem_timeout;

    for queued in files.iter_mut() {
        if handle.is_cancel_requested() {
            send_cancel(channel)?;
            return Err(TransferError::LocalCancel);
        }

        send_block0(channel, &queued.meta, config, timeout)?;

        session.begin_file(FileInfo::new(
            queued.meta.name.clone(),
            std::path::PathBuf::from(&queued.meta.name),
            BLOCK_LEN,
        ));
        session.set_state(SessionState::Transfer);

        wait_for_data_request(channel, config, timeout)?;
        send_file_data(channel, &mut queued.file, session, handle, config, timeout, streaming)?;

        session.finish_current_file();
        session.set_state(SessionState::FileDone);
    }

    if handle.is_cancel_requested() {
        send_cancel(channel)?;
        return Err(TransferError::LocalCancel);
    }
    send_block0(channel, &Block0Meta::end_of_batch(), config, timeout)?;
    session.set_state(SessionState::End);
    Ok(())
}

fn send_block0<P: TimedPort>(
    channel: &mut Channel<P>,
    meta: &Block0Meta,
    config: &TransferConfig,
    timeout: Duration,
) -> Result<()> {
    let mut payload = meta.encode();
    payload.resize(BLOCK_LEN, 0);
    let block = encode_block(0, &payload, BLOCK_LEN, true);

    wait_for_data_request(channel, config, timeout)?;

    let mut errors = 0u32;
    loop {
        channel.write(&block)?;
        channel.flush()?;
        match channel.read_byte(timeout) {
            Ok(ACK) => return Ok(()),
            Ok(CAN) => {
                if channel.read_byte(timeout) == Ok(CAN) {
                    return Err(TransferError::RemoteCancel);
                }
            }
            _ => {}
        }
        errors += 1;
        warn!("ymodem: block 0 not acked, retry {errors}");
        if errors >= config.ymodem_max_block_errors {
            send_cancel(channel)?;
            return Err(TransferError::Protocol(
                "block 0 exceeded retry budget".into(),
            ));
        }
    }
}

/// Waits for the receiver's 'C'/'G' handshake byte requesting data.
fn wait_for_data_request<P: TimedPort>(
    channel: &mut Channel<P>,
    config: &TransferConfig,
    timeout: Duration,
) -> Result<()> {
    let mut cancels = 0u32;
    for _ in 0..config.ymodem_max_block_errors.max(1) * 2 {
        match channel.read_byte(timeout) {
            Ok(C) | Ok(G) => return Ok(()),
            Ok(CAN) => {
                cancels += 1;
                if cancels >= 2 {
                    return Err(TransferError::RemoteCancel);
                }
            }
            Ok(other) => debug!("ymodem: ignoring byte {other:#04x} while waiting for request"),
            Err(_) => {}
        }
    }
    Err(TransferError::Timeout(
        "peer never requested data".into(),
    ))
}

#[allow(clippy::too_many_arguments)]
fn send_file_data<P, F>(
    channel: &mut Channel<P>,
    file: &mut F,
    session: &Session,
    handle: &SessionHandle,
    config: &TransferConfig,
    timeout: Duration,
    streaming: bool,
) -> Result<()>
where
    P: TimedPort,
    F: LocalFile,
{
    let mut seq: u8 = 1;
    let mut buf = vec![0u8; BLOCK_LEN];
    loop {
        if handle.is_cancel_requested() {
            send_cancel(channel)?;
            return Err(TransferError::LocalCancel);
        }

        let n = file
            .read(&mut buf)
            .map_err(|e| TransferError::File(e.to_string()))?;
        if n == 0 {
            return finish(channel, config, timeout);
        }

        let block = encode_block(seq, &buf[..n], BLOCK_LEN, true);
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
        warn!("ymodem: block {seq} not acked, retry {errors}");
        if errors >= config.ymodem_max_block_errors {
            send_cancel(channel)?;
            return Err(TransferError::Protocol(format!(
                "block {seq} exceeded retry budget"
            )));
        }
    }
}

fn finish<P: TimedPort>(
    channel: &mut Channel<P>,
    config: &TransferConfig,
    timeout: Duration,
) -> Result<()> {
    for attempt in 0..config.ymodem_max_block_errors {
        channel.write_byte(EOT)?;
        channel.flush()?;
        match channel.read_byte(timeout) {
            Ok(ACK) => return Ok(()),
            Ok(NAK) => {
                debug!("ymodem: EOT attempt {attempt} NAKed, resending");
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
