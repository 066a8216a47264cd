//! Timed, cancellable byte channel adapter.
//!
//! Engines never talk to a raw `Read`/`Write` port directly; they go
//! through a `Channel`, which turns "block until data or timeout" into
//! bounded waits that also notice a session's cancel flag promptly.

use std::io::{self, Read as IoRead, Write as IoWrite};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::WireError;

/// Cooperative cancellation flag, cloned between a session and the channel
/// its engine is blocked on.
pub type CancelFlag = Arc<AtomicBool>;

/// How often a blocked read re-checks the cancel flag, bounding
/// `cancelTransfer`'s response latency regardless of the caller's
/// requested timeout.
const POLL_QUANTUM: Duration = Duration::from_millis(100);

/// A byte port able to bound how long a single `read` may block. This is
/// the shape `serialport::SerialPort` and a `TcpStream` (via
/// `set_read_timeout`) both already have.
pub trait TimedPort: IoRead + IoWrite {
    /// Bounds the next `read` call; `Duration::ZERO` means "don't block".
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

fn is_would_block(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// The wire-I/O abstraction consumed by every protocol engine.
pub struct Channel<P> {
    port: P,
    cancel: CancelFlag,
    out: Vec<u8>,
}

impl<P: TimedPort> Channel<P> {
    pub fn new(port: P, cancel: CancelFlag) -> Self {
        Self {
            port,
            cancel,
            out: Vec::new(),
        }
    }

    /// Handle to this channel's cancel flag, for a `SessionHandle` to share.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        Arc::clone(&self.cancel)
    }

    /// Unwraps the channel back into its underlying port, discarding any
    /// unflushed output. Used by tests that wire a writer channel's bytes
    /// into a separate reader channel.
    #[must_use]
    pub fn into_port(self) -> P {
        self.port
    }

    fn check_cancelled(&self) -> Result<(), WireError> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(WireError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Reads a single byte, waiting up to `timeout`.
    pub fn read_byte(&mut self, timeout: Duration) -> Result<u8, WireError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_cancelled()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(WireError::Timeout);
            }
            let slice = remaining.min(POLL_QUANTUM);
            self.port.set_read_timeout(slice)?;
            let mut buf = [0u8; 1];
            match self.port.read(&mut buf) {
                Ok(0) => return Err(WireError::Eof),
                Ok(_) => return Ok(buf[0]),
                Err(e) if is_would_block(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Reads exactly `buf.len()` bytes, or fails (total wait bounded by
    /// `timeout`, not per-byte).
    pub fn read_n(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), WireError> {
        let deadline = Instant::now() + timeout;
        for slot in buf.iter_mut() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            *slot = self.read_byte(remaining)?;
        }
        Ok(())
    }

    /// Buffers `data` for the next `flush`.
    pub fn write(&mut self, data: &[u8]) -> Result<(), WireError> {
        self.check_cancelled()?;
        self.out.extend_from_slice(data);
        Ok(())
    }

    pub fn write_byte(&mut self, b: u8) -> Result<(), WireError> {
        self.write(&[b])
    }

    /// Forces buffered output onto the wire.
    pub fn flush(&mut self) -> Result<(), WireError> {
        self.port.write_all(&self.out)?;
        self.port.flush()?;
        self.out.clear();
        Ok(())
    }

    /// Reads and discards bytes until the port has been quiet for
    /// `quiet_for` (used before resync).
    pub fn drain(&mut self, quiet_for: Duration) -> Result<(), WireError> {
        loop {
            match self.read_byte(quiet_for) {
                Ok(_) => continue,
                Err(WireError::Timeout) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct MemPort {
        inbox: VecDeque<u8>,
        outbox: Vec<u8>,
        timeout: Duration,
    }

    impl IoRead for MemPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.timeout.is_zero() && self.inbox.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "timeout"));
            }
            match self.inbox.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "timeout")),
            }
        }
    }

    impl IoWrite for MemPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbox.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl TimedPort for MemPort {
        fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.timeout = timeout;
            Ok(())
        }
    }

    #[test]
    fn read_byte_returns_timeout_when_empty() {
        let port = MemPort {
            inbox: VecDeque::new(),
            outbox: Vec::new(),
            timeout: Duration::ZERO,
        };
        let mut chan = Channel::new(port, Arc::new(AtomicBool::new(false)));
        assert_eq!(
            chan.read_byte(Duration::from_millis(50)),
            Err(WireError::Timeout)
        );
    }

    #[test]
    fn read_byte_returns_cancelled_when_flag_set() {
        let port = MemPort {
            inbox: VecDeque::new(),
            outbox: Vec::new(),
            timeout: Duration::ZERO,
        };
        let cancel = Arc::new(AtomicBool::new(true));
        let mut chan = Channel::new(port, cancel);
        assert_eq!(
            chan.read_byte(Duration::from_secs(5)),
            Err(WireError::Cancelled)
        );
    }

    #[test]
    fn write_then_flush_reaches_port() {
        let port = MemPort {
            inbox: VecDeque::new(),
            outbox: Vec::new(),
            timeout: Duration::ZERO,
        };
        let mut chan = Channel::new(port, Arc::new(AtomicBool::new(false)));
        chan.write(&[1, 2, 3]).unwrap();
        assert!(chan.port.outbox.is_empty());
        chan.flush().unwrap();
        assert_eq!(chan.port.outbox, vec![1, 2, 3]);
    }

    #[test]
    fn read_n_collects_bytes() {
        let port = MemPort {
            inbox: VecDeque::from(vec![9, 8, 7]),
            outbox: Vec::new(),
            timeout: Duration::from_millis(10),
        };
        let mut chan = Channel::new(port, Arc::new(AtomicBool::new(false)));
        let mut buf = [0u8; 3];
        chan.read_n(&mut buf, Duration::from_millis(200)).unwrap();
        assert_eq!(buf, [9, 8, 7]);
    }
}
