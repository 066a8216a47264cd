//! Protocol façade: selects an engine by `(protocol, flavor,
//! direction)`, wires it to the session, and runs it to a terminal state.
//!
//! `cancel()`/`skip()` deliberately do not live here; they're
//! `SessionHandle` methods, callable from an observer thread while `run`
//! blocks inside the engine on this one.

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::local_file::{LocalFile, LocalFileSystem};
use crate::session::{Direction, Flavor, Protocol, Session, SessionHandle, SessionState};
use crate::wire::{Channel, TimedPort};
use crate::ymodem::QueuedFile;

/// What a façade `run` call is given to transfer, shaped by protocol:
/// Xmodem moves exactly one file; Ymodem/Zmodem move a named batch.
pub enum Transfer<'a, F: LocalFile, FS: LocalFileSystem> {
    /// Upload a single file (Xmodem).
    UploadOne(&'a mut F),
    /// Upload a named batch (Ymodem, Zmodem).
    UploadBatch(&'a mut [QueuedFile<F>]),
    /// Download a single file, already opened for write (Xmodem).
    DownloadOne(&'a mut F),
    /// Download into a directory-scoped filesystem (Ymodem, Zmodem).
    DownloadBatch(&'a FS),
}

/// Runs `session`'s engine to completion over `channel`, returning the
/// terminal `SessionState`.
pub fn run<P, F, FS>(
    channel: &mut Channel<P>,
    transfer: Transfer<'_, F, FS>,
    session: &Session,
    handle: &SessionHandle,
    config: &TransferConfig,
) -> Result<SessionState>
where
    P: TimedPort,
    F: LocalFile,
    FS: LocalFileSystem<File = F>,
{
    let protocol = handle.protocol();
    let flavor = handle.flavor();
    let direction = handle.direction();

    session.set_state(SessionState::Init);

    let outcome = dispatch(channel, transfer, protocol, flavor, direction, session, handle, config);

    match outcome {
        Ok(()) => Ok(handle.state()),
        Err(e) => {
            session.add_error_message(e.tag(), &e);
            session.set_state(SessionState::Abort);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch<P, F, FS>(
    channel: &mut Channel<P>,
    transfer: Transfer<'_, F, FS>,
    protocol: Protocol,
    flavor: Flavor,
    direction: Direction,
    session: &Session,
    handle: &SessionHandle,
    config: &TransferConfig,
) -> Result<()>
where
    P: TimedPort,
    F: LocalFile,
    FS: LocalFileSystem<File = F>,
{
    match (protocol, direction, transfer) {
        (Protocol::Xmodem, Direction::Upload, Transfer::UploadOne(file)) => {
            crate::xmodem::send(channel, file, session, handle, config)
        }
        (Protocol::Xmodem, Direction::Download, Transfer::DownloadOne(file)) => {
            crate::xmodem::receive(channel, file, session, handle, config)
        }
        (Protocol::Ymodem, Direction::Upload, Transfer::UploadBatch(files)) => {
            crate::ymodem::send_batch(channel, files, session, handle, config)
        }
        (Protocol::Ymodem, Direction::Download, Transfer::DownloadBatch(fs)) => {
            crate::ymodem::receive_batch(channel, fs, session, handle, config)
        }
        (Protocol::Zmodem, Direction::Upload, Transfer::UploadBatch(files)) => {
            crate::zmodem::send_batch(channel, files, session, handle, config)
        }
        (Protocol::Zmodem, Direction::Download, Transfer::DownloadBatch(fs)) => {
            crate::zmodem::receive_batch(channel, fs, session, handle, config)
        }
        (Protocol::Kermit, ..) => Err(TransferError::UnsupportedFlavor),
        (_, _, _) => Err(TransferError::Protocol(format!(
            "{:?}/{:?} does not match the {:?} transfer shape it was given",
            protocol, direction, flavor
        ))),
    }
}
