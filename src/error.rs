//! The error taxonomy: integrity/timeout errors are recoverable by the
//! engines themselves (retry, resync); everything else is immediately
//! terminal and carries the session straight to `SessionState::Abort`.

use std::io;

use thiserror::Error;

/// Errors surfaced by a protocol engine.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Checksum/CRC mismatch or a header that didn't parse.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// No bytes arrived within the configured window.
    #[error("timeout waiting for {0}")]
    Timeout(String),

    /// A sequence of frames/blocks that should not occur given the current
    /// state (duplicate out-of-order block, unexpected header type, retry
    /// budget exceeded).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The underlying byte channel failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The remote end sent its cancel sequence.
    #[error("transfer cancelled by remote peer")]
    RemoteCancel,

    /// The local user invoked `SessionHandle::cancel_transfer`.
    #[error("transfer cancelled locally")]
    LocalCancel,

    /// Local file open/read/write/seek failed.
    #[error("local file error: {0}")]
    File(String),

    /// Negotiation produced no common flavor.
    #[error("no supported flavor in common with peer")]
    UnsupportedFlavor,
}

impl TransferError {
    /// Short tag used when the error is appended to the session's message
    /// log alongside the human-readable text.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            TransferError::Integrity(_) => "IntegrityError",
            TransferError::Timeout(_) => "TimeoutError",
            TransferError::Protocol(_) => "ProtocolError",
            TransferError::Io(_) => "IoError",
            TransferError::RemoteCancel => "RemoteCancel",
            TransferError::LocalCancel => "LocalCancel",
            TransferError::File(_) => "FileError",
            TransferError::UnsupportedFlavor => "UnsupportedFlavor",
        }
    }

    /// Whether this error is recovered locally (retry/resync) rather than
    /// immediately promoted to a terminal abort. Integrity and timeout
    /// errors are recoverable until a retry budget is exhausted, at which
    /// point the caller constructs a `TransferError::Protocol` instead.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransferError::Integrity(_) | TransferError::Timeout(_))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TransferError>;

/// Wire-level read/write/drain errors, kept distinct from `TransferError`
/// so `wire.rs` stays a pure adapter; engines convert these at the point a
/// read actually matters to protocol state (see `wire::WireError::into_transfer`).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum WireError {
    /// No byte arrived before the deadline.
    #[error("timeout")]
    Timeout,
    /// The session-scoped cancel flag was observed during a blocked read.
    #[error("cancelled")]
    Cancelled,
    /// The underlying channel reached end of stream.
    #[error("end of stream")]
    Eof,
    /// The underlying channel raised an I/O error; message only, `io::Error`
    /// is not `Clone`/`PartialEq` so it is flattened to text here.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        WireError::Io(e.to_string())
    }
}

impl From<WireError> for TransferError {
    /// Generic conversion for call sites that don't have a more specific
    /// context string to attach; use `WireError::into_transfer` when one is
    /// available (e.g. "ACK for block 5").
    fn from(e: WireError) -> Self {
        e.into_transfer("wire channel")
    }
}

impl WireError {
    /// Converts a wire-level failure into the protocol-level taxonomy,
    /// tagging the context (e.g. "ACK for block 5") for the message log.
    #[must_use]
    pub fn into_transfer(self, context: &str) -> TransferError {
        match self {
            WireError::Timeout => TransferError::Timeout(context.to_string()),
            WireError::Cancelled => TransferError::LocalCancel,
            WireError::Eof => TransferError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("unexpected EOF while waiting for {context}"),
            )),
            WireError::Io(msg) => {
                TransferError::Io(io::Error::new(io::ErrorKind::Other, msg))
            }
        }
    }
}
