//! Zmodem receiver.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};

use super::{await_header, control_header, data_header, send_and_await_header};
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::frame::zmodem_codec::{our_capabilities, read_subpacket, Encoding, Frame, Packet};
use crate::local_file::{LocalFile, LocalFileSystem, OpenMode};
use crate::session::{FileInfo, Session, SessionHandle, SessionState};
use crate::wire::{Channel, TimedPort};
use crate::ymodem::block0::Block0Meta;

/// Drives the download side of a Zmodem session: request, receive, and
/// acknowledge files until the peer sends `ZFIN`.
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
    let timeout = config.zmodem_header_timeout;
    let retries = config.zmodem_header_retries;

    loop {
        if handle.is_cancel_requested() {
            super::attention::send_attention(channel)?;
            return Err(TransferError::LocalCancel);
        }

        let request = control_header(Frame::ZRINIT, u32::from(our_capabilities().bits()));
        let header = send_and_await_header(channel, request, retries, timeout)?;

        match header.frame() {
            Frame::ZFILE => {
                receive_one_file(channel, fs, session, handle, config, timeout, retries, header.encoding())?;
            }
            Frame::ZFIN => {
                control_header(Frame::ZFIN, 0).write(channel)?;
                channel.flush()?;
                // Best-effort "OO" terminator; absence isn't fatal.
                let _ = channel.read_byte(Duration::from_millis(500));
                let _ = channel.read_byte(Duration::from_millis(500));
                session.set_state(SessionState::End);
                return Ok(());
            }
            other => {
                debug!("zmodem: ignoring unexpected header {other:?} while idle");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn receive_one_file<P, FS>(
    channel: &mut Channel<P>,
    fs: &FS,
    session: &Session,
    handle: &SessionHandle,
    config: &TransferConfig,
    timeout: Duration,
    retries: u32,
    encoding: Encoding,
) -> Result<()>
where
    P: TimedPort,
    FS: LocalFileSystem,
{
    let (_terminator, payload) = read_subpacket(channel, encoding, timeout)?;
    let meta = Block0Meta::decode(&payload);
    let path = PathBuf::from(&meta.name);

    if handle.is_skip_requested() {
        handle.clear_skip_request();
        control_header(Frame::ZSKIP, 0).write(channel)?;
        channel.flush()?;
        return Ok(());
    }

    let existing = fs.existing_size(&path).unwrap_or(0);
    let mut file = fs
        .open(&path, OpenMode::Write)
        .map_err(|e| TransferError::File(e.to_string()))?;
    if existing > 0 {
        file.seek(existing)
            .map_err(|e| TransferError::File(e.to_string()))?;
        info!("zmodem: resuming {} from offset {existing}", meta.name);
    }

    let mut info = FileInfo::new(meta.name.clone(), path, crate::frame::zmodem_codec::BUFFER_SIZE);
    info.size = Some(meta.size);
    info.mtime = meta.mtime_as_system_time();
    info.mode = meta.mode;
    session.begin_file(info);
    session.set_state(SessionState::Transfer);

    let mut offset = existing;
    loop {
        if handle.is_cancel_requested() {
            super::attention::send_attention(channel)?;
            return Err(TransferError::LocalCancel);
        }

        let request = control_header(Frame::ZRPOS, offset as u32);
        let header = send_and_await_header(channel, request, retries, timeout)?;
        match header.frame() {
            Frame::ZDATA => {
                if header.count() as u64 != offset {
                    // Peer is replaying from a stale offset; ask again.
                    continue;
                }
                offset = receive_data_phase(channel, &mut file, session, handle, config, timeout, offset)?;
            }
            Frame::ZEOF => {
                if header.count() as u64 == offset {
                    if meta.size > 0 {
                        file.truncate(meta.size)
                            .map_err(|e| TransferError::File(e.to_string()))?;
                    }
                    file.flush().map_err(|e| TransferError::File(e.to_string()))?;
                    session.finish_current_file();
                    session.set_state(SessionState::FileDone);
                    return Ok(());
                }
                warn!("zmodem: ZEOF offset {} did not match {offset}", header.count());
            }
            other => {
                debug!("zmodem: ignoring header {other:?} mid-file");
            }
        }
    }
}

fn receive_data_phase<P, F>(
    channel: &mut Channel<P>,
    file: &mut F,
    session: &Session,
    handle: &SessionHandle,
    config: &TransferConfig,
    timeout: Duration,
    start_offset: u64,
) -> Result<u64>
where
    P: TimedPort,
    F: LocalFile,
{
    let mut offset = start_offset;
    let mut since_ack = 0usize;

    loop {
        if handle.is_cancel_requested() {
            super::attention::send_attention(channel)?;
            return Err(TransferError::LocalCancel);
        }

        match read_subpacket(channel, Encoding::ZBIN32, timeout) {
            Ok((terminator, data)) => {
                file.write_all(&data)
                    .map_err(|e| TransferError::File(e.to_string()))?;
                offset += data.len() as u64;
                session.record_bytes(data.len() as u64);
                session.record_block();
                since_ack += 1;

                match terminator {
                    Packet::ZCRCW => {
                        data_header(Frame::ZACK, offset as u32).write(channel)?;
                        channel.flush()?;
                        return Ok(offset);
                    }
                    Packet::ZCRCE => return Ok(offset),
                    Packet::ZCRCQ => {
                        data_header(Frame::ZACK, offset as u32).write(channel)?;
                        channel.flush()?;
                        since_ack = 0;
                    }
                    Packet::ZCRCG => {
                        if since_ack >= config.zmodem_subpackets_per_ack {
                            data_header(Frame::ZACK, offset as u32).write(channel)?;
                            channel.flush()?;
                            since_ack = 0;
                        }
                    }
                }
            }
            Err(TransferError::Integrity(_)) => {
                session.record_file_error();
                warn!("zmodem: bad subpacket at offset {offset}, requesting rewind");
                control_header(Frame::ZRPOS, offset as u32).write(channel)?;
                channel.flush()?;
                return Ok(offset);
            }
            Err(e) => return Err(e),
        }
    }
}
