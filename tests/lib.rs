//! Interop tests against the real `lrzsz` `sz`/`rz` binaries. Opt-in:
//! only compiled when `build.rs` detects them on the host. The
//! always-run suite lives in `tests/xmodem.rs`, `tests/ymodem.rs`, and
//! `tests/zmodem.rs`, driven over an in-process loopback pipe instead of
//! a subprocess.

#![cfg(host_has_rzsz)]

use std::fs::File;
use std::io::{Read, Result, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use filexfer::config::TransferConfig;
use filexfer::local_file::mem::MemFs;
use filexfer::local_file::{LocalFileSystem, OpenMode};
use filexfer::session::{Direction, Flavor, Protocol, Session};
use filexfer::wire::{Channel, TimedPort};
use filexfer::xmodem;

/// Pairs a subprocess's stdout/stdin into a single duplex port, the same
/// way a real serial link looks from this crate's point of view.
struct InOut<R: Read, W: Write> {
    r: R,
    w: W,
}

impl<R: Read, W: Write> InOut<R, W> {
    fn new(r: R, w: W) -> Self {
        Self { r, w }
    }
}

impl<R: Read, W: Write> Read for InOut<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.r.read(buf)
    }
}

impl<R: Read, W: Write> Write for InOut<R, W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.w.write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.w.flush()
    }
}

impl<R: Read, W: Write> TimedPort for InOut<R, W> {
    fn set_read_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

const TMP_DIR: &str = env!("CARGO_TARGET_TMPDIR");

fn test_data() -> Vec<u8> {
    (0..8192u32).map(|i| (i * 7 % 256) as u8).collect()
}

#[test]
fn receives_from_real_sz() {
    let data = test_data();
    let file_name = format!("{TMP_DIR}/from_sz.bin");
    File::create(&file_name).unwrap().write_all(&data).unwrap();

    let sz = Command::new("sz")
        .arg("--xmodem")
        .arg(&file_name)
        .stdout(Stdio::piped())
        .stdin(Stdio::piped())
        .spawn()
        .unwrap();
    let port = InOut::new(sz.stdout.unwrap(), sz.stdin.unwrap());

    let session = Session::new(Protocol::Xmodem, Flavor::XmodemCrc, Direction::Download);
    let handle = session.handle();
    let mut channel = Channel::new(port, session.cancel_flag());
    let config = TransferConfig::default();
    let fs = MemFs::new();
    let mut out = fs.open(Path::new("out.bin"), OpenMode::Write).unwrap();
    xmodem::receive(&mut channel, &mut out, &session, &handle, &config).unwrap();

    assert_eq!(fs.contents(Path::new("out.bin")).unwrap(), data);
}

#[test]
fn sends_to_real_rz() {
    let data = test_data();
    let file_name = format!("{TMP_DIR}/to_rz.bin");
    let _ = std::fs::remove_file(&file_name);

    let rz = Command::new("rz")
        .arg("--xmodem")
        .stdout(Stdio::piped())
        .stdin(Stdio::piped())
        .current_dir(TMP_DIR)
        .spawn()
        .unwrap();
    let port = InOut::new(rz.stdout.unwrap(), rz.stdin.unwrap());

    let session = Session::new(Protocol::Xmodem, Flavor::XmodemCrc, Direction::Upload);
    let handle = session.handle();
    let mut channel = Channel::new(port, session.cancel_flag());
    let config = TransferConfig::default();
    let fs = MemFs::new();
    fs.seed("to_rz.bin", data.clone());
    let mut file = fs.open(Path::new("to_rz.bin"), OpenMode::Read).unwrap();
    xmodem::send(&mut channel, &mut file, &session, &handle, &config).unwrap();

    let mut received = Vec::new();
    File::open(&file_name)
        .unwrap()
        .read_to_end(&mut received)
        .unwrap();
    assert_eq!(data, received);
}
