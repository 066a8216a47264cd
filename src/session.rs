//! The shared session model: state machine, per-file
//! progress, message log, and cooperative cancel/skip control, safe to
//! read from any number of observer threads while a single engine thread
//! drives the transfer.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::wire::CancelFlag;

/// The protocol family in use for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Xmodem,
    Ymodem,
    Zmodem,
    Kermit,
}

impl Protocol {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Protocol::Xmodem => "Xmodem",
            Protocol::Ymodem => "Ymodem",
            Protocol::Zmodem => "Zmodem",
            Protocol::Kermit => "Kermit",
        }
    }
}

/// Per-protocol variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavor {
    /// Xmodem: 128-byte blocks, 8-bit checksum.
    XmodemVanilla,
    /// Xmodem: `VANILLA` framing with long (60s) timeouts.
    XmodemRelaxed,
    /// Xmodem: 128-byte blocks, CRC-16.
    XmodemCrc,
    /// Xmodem-1K: 1024-byte blocks, CRC-16.
    Xmodem1K,
    /// Xmodem-1K/G: streaming, no per-block ACK.
    Xmodem1KG,
    /// Ymodem: 1K blocks with a leading metadata block.
    YmodemVanilla,
    /// Ymodem-G: streaming, no per-block ACK.
    YmodemG,
    /// Zmodem with a 16-bit CRC.
    ZmodemVanilla,
    /// Zmodem with a 32-bit CRC.
    ZmodemCrc32,
    /// Kermit, sharing the session/state-machine shape of the others.
    Kermit,
}

impl Flavor {
    /// The block size for flavors with a fixed block size (Xmodem/Ymodem);
    /// `None` for window/subpacket-based flavors (Zmodem, Kermit).
    #[must_use]
    pub fn fixed_block_size(self) -> Option<usize> {
        match self {
            Flavor::XmodemVanilla | Flavor::XmodemRelaxed | Flavor::XmodemCrc => Some(128),
            Flavor::Xmodem1K | Flavor::Xmodem1KG | Flavor::YmodemVanilla | Flavor::YmodemG => {
                Some(1024)
            }
            Flavor::ZmodemVanilla | Flavor::ZmodemCrc32 | Flavor::Kermit => None,
        }
    }

    /// Whether the flavor streams without waiting for a per-block ACK
    /// (Xmodem-1K/G, Ymodem-G).
    #[must_use]
    pub fn is_streaming(self) -> bool {
        matches!(self, Flavor::Xmodem1KG | Flavor::YmodemG)
    }
}

/// Transfer direction from the local process's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// The session-level finite automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    DownloadFileInfo,
    Transfer,
    FileDone,
    End,
    Abort,
}

impl SessionState {
    /// `Abort`/`End` are terminal and latching: once reached, no further
    /// state transition is permitted.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::End | SessionState::Abort)
    }
}

/// Per-file bookkeeping.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Remote-supplied or local logical name.
    pub name: String,
    /// Path under the transfer directory.
    pub local_path: PathBuf,
    /// Declared size, or `None` when unknown (pure Xmodem).
    pub size: Option<u64>,
    pub mtime: Option<SystemTime>,
    pub mode: Option<u32>,
    pub bytes_transferred: u64,
    pub blocks_transferred: u64,
    pub block_size: usize,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
    pub error_count: u32,
}

impl FileInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, local_path: PathBuf, block_size: usize) -> Self {
        Self {
            name: name.into(),
            local_path,
            size: None,
            mtime: None,
            mode: None,
            bytes_transferred: 0,
            blocks_transferred: 0,
            block_size,
            start_time: None,
            end_time: None,
            error_count: 0,
        }
    }

    /// `bytesTransferred <= size` when size is known, and
    /// `blocksTransferred * blockSize >= bytesTransferred`.
    #[must_use]
    pub fn invariant_holds(&self) -> bool {
        let size_ok = self.size.is_none_or(|s| self.bytes_transferred <= s);
        let block_ok =
            self.blocks_transferred * self.block_size as u64 >= self.bytes_transferred;
        size_ok && block_ok
    }
}

/// Tag for a `SerialFileTransferMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Error,
}

/// A single append-only log entry.
#[derive(Debug, Clone)]
pub struct SerialFileTransferMessage {
    pub kind: MessageKind,
    pub text: String,
    pub timestamp: SystemTime,
}

struct Inner {
    protocol: Protocol,
    flavor: Flavor,
    direction: Direction,
    state: SessionState,
    files: Vec<FileInfo>,
    bytes_transferred: u64,
    blocks_transferred: u64,
    bytes_total_goal: Option<u64>,
    blocks_total_goal: Option<u64>,
    last_block_millis: u64,
    start_time: Option<SystemTime>,
    end_time: Option<SystemTime>,
    messages: Vec<SerialFileTransferMessage>,
    keep_partial: bool,
}

impl Inner {
    fn block_size(&self) -> usize {
        self.files
            .last()
            .map_or_else(|| self.flavor.fixed_block_size().unwrap_or(1024), |f| f.block_size)
    }
}

/// The shared, owned session value. `Session` is constructed once by
/// whichever side drives the engine; `handle()` hands observers a cheap,
/// cloneable view onto the same locked state.
pub struct Session {
    inner: Arc<Mutex<Inner>>,
    cancel: CancelFlag,
    skip: CancelFlag,
}

/// A cloneable, read/control-only view of a `Session`, safe to hand to any
/// number of observer threads.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<Inner>>,
    cancel: CancelFlag,
    skip: CancelFlag,
}

impl Session {
    /// Starts a new session in `SessionState::Init`.
    #[must_use]
    pub fn new(protocol: Protocol, flavor: Flavor, direction: Direction) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                protocol,
                flavor,
                direction,
                state: SessionState::Init,
                files: Vec::new(),
                bytes_transferred: 0,
                blocks_transferred: 0,
                bytes_total_goal: None,
                blocks_total_goal: None,
                last_block_millis: 0,
                start_time: None,
                end_time: None,
                messages: Vec::new(),
                keep_partial: true,
            })),
            cancel: Arc::new(AtomicBool::new(false)),
            skip: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A cloneable handle observers can hold independently of this value's
    /// lifetime.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            inner: Arc::clone(&self.inner),
            cancel: Arc::clone(&self.cancel),
            skip: Arc::clone(&self.skip),
        }
    }

    /// The cancel flag a `wire::Channel` should poll.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        Arc::clone(&self.cancel)
    }

    // --- Engine-side mutators -------------------------------------------------

    pub fn set_state(&self, state: SessionState) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() {
            // Terminal latching: no further transitions.
            return;
        }
        if inner.state == SessionState::Init && state != SessionState::Init {
            inner.start_time = Some(SystemTime::now());
        }
        if state.is_terminal() {
            inner.end_time = Some(SystemTime::now());
        }
        inner.state = state;
    }

    pub fn begin_file(&self, file: FileInfo) {
        let mut inner = self.inner.lock().unwrap();
        let mut file = file;
        file.start_time = Some(SystemTime::now());
        inner.files.push(file);
    }

    pub fn finish_current_file(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(f) = inner.files.last_mut() {
            f.end_time = Some(SystemTime::now());
        }
    }

    /// Records `n` more bytes transferred for the current file and the
    /// session totals.
    pub fn record_bytes(&self, n: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.bytes_transferred += n;
        if let Some(f) = inner.files.last_mut() {
            f.bytes_transferred += n;
        }
        inner.last_block_millis = now_millis();
    }

    pub fn record_block(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.blocks_transferred += 1;
        if let Some(f) = inner.files.last_mut() {
            f.blocks_transferred += 1;
        }
    }

    pub fn record_file_error(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(f) = inner.files.last_mut() {
            f.error_count += 1;
        }
    }

    pub fn set_totals_goal(&self, bytes: Option<u64>, blocks: Option<u64>) {
        let mut inner = self.inner.lock().unwrap();
        inner.bytes_total_goal = bytes;
        inner.blocks_total_goal = blocks;
    }

    pub fn add_info_message(&self, text: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.messages.push(SerialFileTransferMessage {
            kind: MessageKind::Info,
            text: text.into(),
            timestamp: SystemTime::now(),
        });
    }

    pub fn add_error_message(&self, tag: &str, text: impl std::fmt::Display) {
        let mut inner = self.inner.lock().unwrap();
        inner.messages.push(SerialFileTransferMessage {
            kind: MessageKind::Error,
            text: format!("[{tag}] {text}"),
            timestamp: SystemTime::now(),
        });
    }

    /// Milliseconds since the last byte made progress, for the watchdog.
    #[must_use]
    pub fn millis_since_progress(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        now_millis().saturating_sub(inner.last_block_millis)
    }

    #[must_use]
    pub fn keep_partial(&self) -> bool {
        self.inner.lock().unwrap().keep_partial
    }
}

impl SessionHandle {
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.inner.lock().unwrap().protocol
    }

    #[must_use]
    pub fn protocol_name(&self) -> &'static str {
        self.protocol().name()
    }

    #[must_use]
    pub fn flavor(&self) -> Flavor {
        self.inner.lock().unwrap().flavor
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.inner.lock().unwrap().direction
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.inner.lock().unwrap().block_size()
    }

    /// Snapshot of the in-flight file, if any.
    #[must_use]
    pub fn current_file(&self) -> Option<FileInfo> {
        self.inner.lock().unwrap().files.last().cloned()
    }

    /// Snapshot of every file seen so far.
    #[must_use]
    pub fn files(&self) -> Vec<FileInfo> {
        self.inner.lock().unwrap().files.clone()
    }

    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.inner.lock().unwrap().bytes_transferred
    }

    #[must_use]
    pub fn blocks_transferred(&self) -> u64 {
        self.inner.lock().unwrap().blocks_transferred
    }

    /// Bytes per second, or `-1.0` before the transfer starts, or `0.0`
    /// when elapsed time rounds to zero.
    #[must_use]
    pub fn transfer_rate(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        let Some(start) = inner.start_time else {
            return -1.0;
        };
        let end = inner.end_time.unwrap_or_else(SystemTime::now);
        let elapsed = end.duration_since(start).unwrap_or(Duration::ZERO);
        if elapsed.as_secs_f64() <= 0.0 {
            return 0.0;
        }
        inner.bytes_transferred as f64 / elapsed.as_secs_f64()
    }

    /// Percent complete across the whole session, `0.0` when the total
    /// goal is unknown, clamped to `[0, 100]`.
    #[must_use]
    pub fn total_percent_complete(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        match inner.bytes_total_goal {
            Some(goal) if goal > 0 => {
                (inner.bytes_transferred as f64 / goal as f64 * 100.0).clamp(0.0, 100.0)
            }
            _ => 0.0,
        }
    }

    /// Percent complete for the current file. Xmodem downloads (size
    /// unknown until EOT) always report `0.0`.
    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        match inner.files.last().and_then(|f| f.size) {
            Some(size) if size > 0 => {
                let xferred = inner.files.last().map_or(0, |f| f.bytes_transferred);
                (xferred as f64 / size as f64 * 100.0).clamp(0.0, 100.0)
            }
            _ => 0.0,
        }
    }

    #[must_use]
    pub fn last_message(&self) -> Option<SerialFileTransferMessage> {
        self.inner.lock().unwrap().messages.last().cloned()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<SerialFileTransferMessage> {
        self.inner.lock().unwrap().messages.clone()
    }

    // --- Observer control ------------------------------------------------

    /// Requests cancellation; the engine notices at its next suspension
    /// point and transitions to `Abort`.
    pub fn cancel_transfer(&self, keep_partial: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.keep_partial = keep_partial;
        drop(inner);
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Requests the current file be skipped, where the protocol allows it
    /// (Zmodem at file boundaries; Ymodem and Xmodem never).
    pub fn skip_file(&self, keep_partial: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.keep_partial = keep_partial;
        drop(inner);
        self.skip.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_skip_requested(&self) -> bool {
        self.skip.load(Ordering::SeqCst)
    }

    /// Clears a processed skip request (the engine calls this once it has
    /// acted on it, so a single `skip_file` call skips exactly one file).
    pub fn clear_skip_request(&self) {
        self.skip.store(false, Ordering::SeqCst);
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_state_has_no_progress() {
        let session = Session::new(Protocol::Xmodem, Flavor::XmodemCrc, Direction::Download);
        let handle = session.handle();
        assert_eq!(handle.state(), SessionState::Init);
        assert_eq!(handle.bytes_transferred(), 0);
        assert_eq!(handle.transfer_rate(), -1.0);
    }

    #[test]
    fn terminal_state_latches() {
        let session = Session::new(Protocol::Xmodem, Flavor::XmodemCrc, Direction::Download);
        let handle = session.handle();
        session.set_state(SessionState::Transfer);
        session.set_state(SessionState::Abort);
        session.set_state(SessionState::Transfer);
        assert_eq!(handle.state(), SessionState::Abort);
    }

    #[test]
    fn cancel_is_idempotent_and_observable() {
        let session = Session::new(Protocol::Zmodem, Flavor::ZmodemCrc32, Direction::Download);
        let handle = session.handle();
        handle.cancel_transfer(true);
        handle.cancel_transfer(true);
        assert!(handle.is_cancel_requested());
        session.set_state(SessionState::Abort);
        assert_eq!(handle.state(), SessionState::Abort);
    }

    #[test]
    fn bytes_transferred_never_decreases() {
        let session = Session::new(Protocol::Ymodem, Flavor::YmodemVanilla, Direction::Download);
        let handle = session.handle();
        session.set_state(SessionState::Transfer);
        session.record_bytes(10);
        let first = handle.bytes_transferred();
        session.record_bytes(5);
        assert!(handle.bytes_transferred() >= first);
    }

    #[test]
    fn percent_complete_zero_when_size_unknown() {
        let session = Session::new(Protocol::Xmodem, Flavor::XmodemCrc, Direction::Download);
        let handle = session.handle();
        session.begin_file(FileInfo::new("x", PathBuf::from("x"), 128));
        session.record_bytes(64);
        assert_eq!(handle.percent_complete(), 0.0);
    }
}
