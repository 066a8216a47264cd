//! A full-duplex in-memory byte pipe, used to wire two protocol engines
//! together on separate threads instead of spawning real `sz`/`rz`
//! subprocesses. Generalizes the single-direction loopback used by the
//! frame codec's own unit tests into a genuine two-way pipe, since a
//! full protocol round trip needs both directions live at once.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use filexfer::wire::TimedPort;

struct Pipe {
    buf: Mutex<VecDeque<u8>>,
    ready: Condvar,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            buf: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        })
    }
}

pub struct LoopbackPort {
    read_end: Arc<Pipe>,
    write_end: Arc<Pipe>,
    timeout: Duration,
}

/// Builds a connected pair: bytes written to one side arrive readable on
/// the other.
pub fn pair() -> (LoopbackPort, LoopbackPort) {
    let a_to_b = Pipe::new();
    let b_to_a = Pipe::new();
    let a = LoopbackPort {
        read_end: Arc::clone(&b_to_a),
        write_end: Arc::clone(&a_to_b),
        timeout: Duration::from_secs(5),
    };
    let b = LoopbackPort {
        read_end: a_to_b,
        write_end: b_to_a,
        timeout: Duration::from_secs(5),
    };
    (a, b)
}

impl Read for LoopbackPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + self.timeout;
        let mut guard = self.read_end.buf.lock().unwrap();
        loop {
            if let Some(b) = guard.pop_front() {
                buf[0] = b;
                return Ok(1);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "loopback read timed out",
                ));
            }
            let (g, _) = self.read_end.ready.wait_timeout(guard, remaining).unwrap();
            guard = g;
        }
    }
}

impl Write for LoopbackPort {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.write_end.buf.lock().unwrap();
        guard.extend(data.iter().copied());
        drop(guard);
        self.write_end.ready.notify_all();
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl TimedPort for LoopbackPort {
    fn set_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }
}
