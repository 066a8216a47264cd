//! Zmodem sender.

use std::time::Duration;

use log::{debug, info, warn};

use super::{await_header, control_header, data_header, send_and_await_header};
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::frame::zmodem_codec::{write_subpacket, Encoding, Frame, Packet, BUFFER_SIZE};
use crate::local_file::LocalFile;
use crate::session::{FileInfo, Session, SessionHandle, SessionState};
use crate::wire::{Channel, TimedPort};
use crate::ymodem::QueuedFile;

/// Drives the upload side of a Zmodem session: kick off, offer each queued
/// file, and stream it until the peer accepts, skips, or aborts it.
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
    let timeout = config.zmodem_header_timeout;
    let retries = config.zmodem_header_retries;

    let request = control_header(Frame::ZRQINIT, 0);
    let header = send_and_await_header(channel, request, retries, timeout)?;
    if header.frame() != Frame::ZRINIT {
        return Err(TransferError::Protocol(
            "peer did not reply ZRQINIT with ZRINIT".into(),
        ));
    }

    for queued in files.iter_mut() {
        if handle.is_cancel_requested() {
            super::attention::send_attention(channel)?;
            return Err(TransferError::LocalCancel);
        }

        send_one_file(channel, queued, session, handle, config, timeout, retries)?;
    }

    let request = control_header(Frame::ZFIN, 0);
    let reply = send_and_await_header(channel, request, retries, timeout)?;
    if reply.frame() == Frame::ZFIN {
        channel.write_byte(b'O')?;
        channel.write_byte(b'O')?;
        channel.flush()?;
    }
    session.set_state(SessionState::End);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn send_one_file<P, F>(
    channel: &mut Channel<P>,
    queued: &mut QueuedFile<F>,
    session: &Session,
    handle: &SessionHandle,
    config: &TransferConfig,
    timeout: Duration,
    retries: u32,
) -> Result<()>
where
    P: TimedPort,
    F: LocalFile,
{
    let payload = queued.meta.encode();
    let request = control_header(Frame::ZFILE, 0);
    request.write(channel)?;
    write_subpacket(channel, Encoding::ZBIN32, Packet::ZCRCW, &payload)?;
    channel.flush()?;

    let header = await_header(channel, timeout)?;
    match header.frame() {
        Frame::ZSKIP => {
            info!("zmodem: peer skipped {}", queued.meta.name);
            return Ok(());
        }
        Frame::ZABORT | Frame::ZCAN => return Err(TransferError::RemoteCancel),
        Frame::ZRPOS => {}
        other => {
            return Err(TransferError::Protocol(format!(
                "unexpected reply {other:?} to ZFILE"
            )));
        }
    }

    let mut offset = header.count() as u64;
    queued
        .file
        .seek(offset)
        .map_err(|e| TransferError::File(e.to_string()))?;

    let mut info = FileInfo::new(queued.meta.name.clone(), queued.meta.name.clone().into(), BUFFER_SIZE);
    info.size = Some(queued.meta.size);
    info.mtime = queued.meta.mtime_as_system_time();
    info.mode = queued.meta.mode;
    session.begin_file(info);
    session.set_state(SessionState::Transfer);

    loop {
        if handle.is_cancel_requested() {
            super::attention::send_attention(channel)?;
            return Err(TransferError::LocalCancel);
        }

        data_header(Frame::ZDATA, offset as u32).write(channel)?;
        channel.flush()?;

        match stream_until_rewind_or_eof(channel, &mut queued.file, session, handle, config, timeout, offset)? {
            StreamOutcome::Eof(new_offset) => {
                offset = new_offset;
                let request = data_header(Frame::ZEOF, offset as u32);
                let reply = send_and_await_header(channel, request, retries, timeout)?;
                match reply.frame() {
                    Frame::ZRINIT => {
                        session.finish_current_file();
                        session.set_state(SessionState::FileDone);
                        return Ok(());
                    }
                    Frame::ZRPOS => {
                        offset = reply.count() as u64;
                        queued
                            .file
                            .seek(offset)
                            .map_err(|e| TransferError::File(e.to_string()))?;
                        continue;
                    }
                    other => {
                        debug!("zmodem: ignoring header {other:?} after ZEOF");
                        continue;
                    }
                }
            }
            StreamOutcome::Rewind(new_offset) => {
                offset = new_offset;
                queued
                    .file
                    .seek(offset)
                    .map_err(|e| TransferError::File(e.to_string()))?;
                continue;
            }
        }
    }
}

enum StreamOutcome {
    Eof(u64),
    Rewind(u64),
}

#[allow(clippy::too_many_arguments)]
fn stream_until_rewind_or_eof<P, F>(
    channel: &mut Channel<P>,
    file: &mut F,
    session: &Session,
    handle: &SessionHandle,
    config: &TransferConfig,
    timeout: Duration,
    start_offset: u64,
) -> Result<StreamOutcome>
where
    P: TimedPort,
    F: LocalFile,
{
    let mut offset = start_offset;
    let mut since_ack = 0usize;
    let mut buf = vec![0u8; BUFFER_SIZE];

    loop {
        if handle.is_cancel_requested() {
            super::attention::send_attention(channel)?;
            return Err(TransferError::LocalCancel);
        }

        let n = file.read(&mut buf).map_err(|e| TransferError::File(e.to_string()))?;
        if n == 0 {
            write_subpacket(channel, Encoding::ZBIN32, Packet::ZCRCE, &[])?;
            channel.flush()?;
            return Ok(StreamOutcome::Eof(offset));
        }

        since_ack += 1;
        let terminator = if since_ack >= config.zmodem_subpackets_per_ack {
            Packet::ZCRCQ
        } else {
            Packet::ZCRCG
        };
        write_subpacket(channel, Encoding::ZBIN32, terminator, &buf[..n])?;
        channel.flush()?;
        offset += n as u64;
        session.record_bytes(n as u64);
        session.record_block();

        if terminator == Packet::ZCRCQ {
            since_ack = 0;
            match await_header(channel, timeout) {
                Ok(h) if h.frame() == Frame::ZACK => continue,
                Ok(h) if h.frame() == Frame::ZRPOS => {
                    return Ok(StreamOutcome::Rewind(h.count() as u64));
                }
                Ok(other) => {
                    warn!("zmodem: unexpected header {other:?} waiting for ZACK");
                }
                Err(TransferError::Timeout(_)) => {
                    return Ok(StreamOutcome::Rewind(offset));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
