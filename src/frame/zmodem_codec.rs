//! Zmodem header and subpacket wire format: ZDLE escaping, the four
//! header encodings (binary, hex, binary-32), and CRC-16/CRC-32
//! subpacket framing, built on `wire::Channel`/`TimedPort`.

use std::convert::TryFrom;
use std::time::Duration;

use bitflags::bitflags;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

use crate::error::{Result, TransferError};
use crate::frame::checksum::{crc16_ccitt, crc32_zmodem};
use crate::wire::{Channel, TimedPort};

/// Size of the unescaped subpacket payload, matching the maximum
/// subpacket size in the original 1988 Zmodem specification.
pub const BUFFER_SIZE: usize = 1024;

pub const ZPAD: u8 = b'*';
pub const ZDLE: u8 = 0x18;
pub const XON: u8 = 0x11;
/// The Zmodem cancel byte shares its value with `ZDLE`; ≥5 in a row is a
/// remote-cancel signal rather than an escape sequence.
pub const CAN: u8 = 0x18;

#[rustfmt::skip]
const ZDLE_TABLE: [u8; 0x100] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x4d, 0x0e, 0x0f,
    0x50, 0x51, 0x12, 0x53, 0x14, 0x15, 0x16, 0x17, 0x58, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f,
    0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2a, 0x2b, 0x2c, 0x2d, 0x2e, 0x2f,
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f,
    0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4a, 0x4b, 0x4c, 0x4d, 0x4e, 0x4f,
    0x50, 0x51, 0x52, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x5b, 0x5c, 0x5d, 0x5e, 0x5f,
    0x60, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6a, 0x6b, 0x6c, 0x6d, 0x6e, 0x6f,
    0x70, 0x71, 0x72, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a, 0x7b, 0x7c, 0x7d, 0x7e, 0x6c,
    0x80, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8a, 0x8b, 0x8c, 0xcd, 0x8e, 0x8f,
    0xd0, 0xd1, 0x92, 0xd3, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9a, 0x9b, 0x9c, 0x9d, 0x9e, 0x9f,
    0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xab, 0xac, 0xad, 0xae, 0xaf,
    0xb0, 0xb1, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xbb, 0xbc, 0xbd, 0xbe, 0xbf,
    0xc0, 0xc1, 0xc2, 0xc3, 0xc4, 0xc5, 0xc6, 0xc7, 0xc8, 0xc9, 0xca, 0xcb, 0xcc, 0xcd, 0xce, 0xcf,
    0xd0, 0xd1, 0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda, 0xdb, 0xdc, 0xdd, 0xde, 0xdf,
    0xe0, 0xe1, 0xe2, 0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9, 0xea, 0xeb, 0xec, 0xed, 0xee, 0xef,
    0xf0, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9, 0xfa, 0xfb, 0xfc, 0xfd, 0xfe, 0x6d,
];

#[rustfmt::skip]
const UNZDLE_TABLE: [u8; 0x100] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f,
    0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2a, 0x2b, 0x2c, 0x2d, 0x2e, 0x2f,
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f,
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f,
    0x60, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6a, 0x6b, 0x7f, 0xff, 0x6e, 0x6f,
    0x70, 0x71, 0x72, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a, 0x7b, 0x7c, 0x7d, 0x7e, 0x7f,
    0x80, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8a, 0x8b, 0x8c, 0x8d, 0x8e, 0x8f,
    0x90, 0x91, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9a, 0x9b, 0x9c, 0x9d, 0x9e, 0x9f,
    0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xab, 0xac, 0xad, 0xae, 0xaf,
    0xb0, 0xb1, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xbb, 0xbc, 0xbd, 0xbe, 0xbf,
    0x80, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8a, 0x8b, 0x8c, 0x8d, 0x8e, 0x8f,
    0x90, 0x91, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9a, 0x9b, 0x9c, 0x9d, 0x9e, 0x9f,
    0xe0, 0xe1, 0xe2, 0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9, 0xea, 0xeb, 0xec, 0xed, 0xee, 0xef,
    0xf0, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9, 0xfa, 0xfb, 0xfc, 0xfd, 0xfe, 0xff,
];

/// Header/frame-adjacent encoding.
#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, EnumIter, PartialEq, Eq)]
pub enum Encoding {
    ZBIN = 0x41,
    ZHEX = 0x42,
    ZBIN32 = 0x43,
}

impl TryFrom<u8> for Encoding {
    type Error = TransferError;

    fn try_from(value: u8) -> Result<Self> {
        Encoding::iter()
            .find(|e| value == *e as u8)
            .ok_or_else(|| TransferError::Integrity(format!("unknown zmodem encoding {value:#04x}")))
    }
}

/// Zmodem header frame types.
#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, EnumIter, PartialEq, Eq)]
pub enum Frame {
    ZRQINIT = 0,
    ZRINIT = 1,
    ZSINIT = 2,
    ZACK = 3,
    ZFILE = 4,
    ZSKIP = 5,
    ZNAK = 6,
    ZABORT = 7,
    ZFIN = 8,
    ZRPOS = 9,
    ZDATA = 10,
    ZEOF = 11,
    ZFERR = 12,
    ZCRC = 13,
    ZCHALLENGE = 14,
    ZCOMPL = 15,
    ZCAN = 16,
    ZFREECNT = 17,
    ZCOMMAND = 18,
    ZSTDERR = 19,
}

impl TryFrom<u8> for Frame {
    type Error = TransferError;

    fn try_from(value: u8) -> Result<Self> {
        Frame::iter()
            .find(|f| value == *f as u8)
            .ok_or_else(|| TransferError::Integrity(format!("unknown zmodem frame {value:#04x}")))
    }
}

/// Subpacket terminators.
#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, EnumIter, PartialEq, Eq)]
pub enum Packet {
    /// End, no ACK expected.
    ZCRCE = 0x68,
    /// Continue, no ACK.
    ZCRCG = 0x69,
    /// Continue, ACK required.
    ZCRCQ = 0x6a,
    /// End, ACK required.
    ZCRCW = 0x6b,
}

impl TryFrom<u8> for Packet {
    type Error = TransferError;

    fn try_from(value: u8) -> Result<Self> {
        Packet::iter()
            .find(|p| value == *p as u8)
            .ok_or_else(|| TransferError::Integrity(format!("unknown zmodem packet terminator {value:#04x}")))
    }
}

bitflags! {
    /// `ZRINIT` capability flags.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Zrinit: u8 {
        const CANFDX = 0x01;
        const CANOVIO = 0x02;
        const CANBRK = 0x04;
        const CANCRY = 0x08;
        const CANLZW = 0x10;
        const CANFC32 = 0x20;
        const ESCCTL = 0x40;
        const ESC8 = 0x80;
    }
}

/// Our receiver always advertises full duplex, overlapped I/O, and 32-bit
/// CRC support.
#[must_use]
pub fn our_capabilities() -> Zrinit {
    Zrinit::CANFDX | Zrinit::CANOVIO | Zrinit::CANFC32
}

/// A Zmodem frame header: `<frame:1><flags:4>` plus its CRC, in one of
/// three encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    encoding: Encoding,
    frame: Frame,
    flags: [u8; 4],
}

impl Header {
    #[must_use]
    pub const fn new(encoding: Encoding, frame: Frame, flags: [u8; 4]) -> Self {
        Self {
            encoding,
            frame,
            flags,
        }
    }

    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    #[must_use]
    pub const fn frame(&self) -> Frame {
        self.frame
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        u32::from_le_bytes(self.flags)
    }

    #[must_use]
    pub const fn with_count(&self, count: u32) -> Self {
        Header::new(self.encoding, self.frame, count.to_le_bytes())
    }

    /// Writes `ZPAD [ZPAD] ZDLE <encoding>` followed by the escaped,
    /// CRC-trailed header body.
    pub fn write<P: TimedPort>(&self, channel: &mut Channel<P>) -> Result<()> {
        let mut body = Vec::with_capacity(9);
        body.push(self.frame as u8);
        body.extend_from_slice(&self.flags);
        let crc = make_crc(&body, self.encoding);
        body.extend_from_slice(&crc);

        channel.write_byte(ZPAD)?;
        if self.encoding == Encoding::ZHEX {
            channel.write_byte(ZPAD)?;
        }
        channel.write_byte(ZDLE)?;
        channel.write_byte(self.encoding as u8)?;

        if self.encoding == Encoding::ZHEX {
            let hex = hex::encode(&body);
            write_slice_escaped(channel, hex.as_bytes())?;
            channel.write_byte(b'\r')?;
            channel.write_byte(b'\n')?;
            if self.frame != Frame::ZACK && self.frame != Frame::ZFIN {
                channel.write_byte(XON)?;
            }
        } else {
            write_slice_escaped(channel, &body)?;
        }
        Ok(())
    }

    /// Reads and decodes a header, given that the leading `ZPAD`(s) have
    /// already been consumed by [`read_zpad`].
    pub fn read<P: TimedPort>(channel: &mut Channel<P>, timeout: Duration) -> Result<Header> {
        let encoding = Encoding::try_from(channel.read_byte(timeout)?)?;
        let body_len = 5; // frame byte + 4 flag bytes
        let crc_len = if encoding == Encoding::ZBIN32 { 4 } else { 2 };

        let mut body = Vec::with_capacity(body_len + crc_len);
        if encoding == Encoding::ZHEX {
            let mut hexbuf = vec![0u8; (body_len + crc_len) * 2];
            for b in &mut hexbuf {
                *b = read_byte_unescaped(channel, timeout)?;
            }
            let mut decoded = vec![0u8; body_len + crc_len];
            hex::decode_to_slice(&hexbuf, &mut decoded)
                .map_err(|e| TransferError::Integrity(format!("bad zhex header: {e}")))?;
            body = decoded;
        } else {
            for _ in 0..body_len + crc_len {
                body.push(read_byte_unescaped(channel, timeout)?);
            }
        }

        check_crc(&body[..body_len], &body[body_len..], encoding)?;
        let frame = Frame::try_from(body[0])?;
        let mut flags = [0u8; 4];
        flags.copy_from_slice(&body[1..5]);
        Ok(Header::new(encoding, frame, flags))
    }
}

/// Skips the `ZPAD [ZPAD] ZDLE` preamble before a header.
pub fn read_zpad<P: TimedPort>(channel: &mut Channel<P>, timeout: Duration) -> Result<()> {
    if channel.read_byte(timeout)? != ZPAD {
        return Err(TransferError::Integrity("expected ZPAD".into()));
    }
    let mut b = channel.read_byte(timeout)?;
    if b == ZPAD {
        b = channel.read_byte(timeout)?;
    }
    if b == ZDLE {
        Ok(())
    } else {
        Err(TransferError::Integrity("expected ZDLE after ZPAD".into()))
    }
}

/// Writes a data subpacket: escaped payload, `ZDLE` + terminator, escaped
/// CRC over payload+terminator.
pub fn write_subpacket<P: TimedPort>(
    channel: &mut Channel<P>,
    encoding: Encoding,
    kind: Packet,
    data: &[u8],
) -> Result<()> {
    write_slice_escaped(channel, data)?;
    channel.write_byte(ZDLE)?;
    channel.write_byte(kind as u8)?;
    match encoding {
        Encoding::ZBIN32 => {
            let mut buf = data.to_vec();
            buf.push(kind as u8);
            let crc = crc32_zmodem(&buf).to_le_bytes();
            write_slice_escaped(channel, &crc)
        }
        Encoding::ZBIN => {
            let mut buf = data.to_vec();
            buf.push(kind as u8);
            let crc = crc16_ccitt(&buf).to_be_bytes();
            write_slice_escaped(channel, &crc)
        }
        Encoding::ZHEX => Err(TransferError::Protocol(
            "ZHEX subpackets are not used by this implementation".into(),
        )),
    }
}

/// Reads and unescapes a subpacket, verifying its trailing CRC.
pub fn read_subpacket<P: TimedPort>(
    channel: &mut Channel<P>,
    encoding: Encoding,
    timeout: Duration,
) -> Result<(Packet, Vec<u8>)> {
    let mut buf = Vec::new();
    let terminator = loop {
        let byte = channel.read_byte(timeout)?;
        if byte == ZDLE {
            let next = channel.read_byte(timeout)?;
            if let Ok(packet) = Packet::try_from(next) {
                break packet;
            }
            buf.push(UNZDLE_TABLE[next as usize]);
        } else {
            buf.push(byte);
        }
        if buf.len() > BUFFER_SIZE {
            return Err(TransferError::Protocol(
                "zmodem subpacket exceeded maximum size".into(),
            ));
        }
    };

    let crc_len = if encoding == Encoding::ZBIN32 { 4 } else { 2 };
    let mut crc = Vec::with_capacity(crc_len);
    for _ in 0..crc_len {
        crc.push(read_byte_unescaped(channel, timeout)?);
    }

    let mut crc_input = buf.clone();
    crc_input.push(terminator as u8);
    let expected = make_crc(&crc_input, encoding);
    if expected != crc {
        return Err(TransferError::Integrity(
            "zmodem subpacket failed CRC check".into(),
        ));
    }

    Ok((terminator, buf))
}

fn check_crc(data: &[u8], crc: &[u8], encoding: Encoding) -> Result<()> {
    if make_crc(data, encoding) == crc {
        Ok(())
    } else {
        Err(TransferError::Integrity("zmodem header failed CRC check".into()))
    }
}

fn make_crc(data: &[u8], encoding: Encoding) -> Vec<u8> {
    if encoding == Encoding::ZBIN32 {
        crc32_zmodem(data).to_le_bytes().to_vec()
    } else {
        crc16_ccitt(data).to_be_bytes().to_vec()
    }
}

fn write_slice_escaped<P: TimedPort>(channel: &mut Channel<P>, buf: &[u8]) -> Result<()> {
    for &value in buf {
        write_byte_escaped(channel, value)?;
    }
    Ok(())
}

fn write_byte_escaped<P: TimedPort>(channel: &mut Channel<P>, value: u8) -> Result<()> {
    let escaped = ZDLE_TABLE[value as usize];
    if escaped != value {
        channel.write_byte(ZDLE)?;
    }
    channel.write_byte(escaped)?;
    Ok(())
}

fn read_byte_unescaped<P: TimedPort>(channel: &mut Channel<P>, timeout: Duration) -> Result<u8> {
    let b = channel.read_byte(timeout)?;
    Ok(if b == ZDLE {
        UNZDLE_TABLE[channel.read_byte(timeout)? as usize]
    } else {
        b
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::CancelFlag;
    use std::io::{Read as IoRead, Write as IoWrite};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    struct LoopPort {
        inbox: std::collections::VecDeque<u8>,
        outbox: Vec<u8>,
    }

    impl IoRead for LoopPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.inbox.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "eof")),
            }
        }
    }
    impl IoWrite for LoopPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outbox.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
    impl TimedPort for LoopPort {
        fn set_read_timeout(&mut self, _timeout: StdDuration) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn cancel() -> CancelFlag {
        Arc::new(AtomicBool::new(false))
    }

    fn empty_port() -> LoopPort {
        LoopPort {
            inbox: std::collections::VecDeque::new(),
            outbox: Vec::new(),
        }
    }

    /// Writes via `writer_fn` into a throwaway channel, then feeds the
    /// bytes it produced into a fresh reader channel for `reader_fn`.
    fn round_trip<T>(
        writer_fn: impl FnOnce(&mut Channel<LoopPort>) -> Result<()>,
        reader_fn: impl FnOnce(&mut Channel<LoopPort>) -> Result<T>,
    ) -> T {
        let mut writer = Channel::new(empty_port(), cancel());
        writer_fn(&mut writer).unwrap();
        writer.flush().unwrap();
        let written = writer.into_port().outbox;

        let mut reader = Channel::new(
            LoopPort {
                inbox: written.into_iter().collect(),
                outbox: Vec::new(),
            },
            cancel(),
        );
        reader_fn(&mut reader).unwrap()
    }

    #[test]
    fn header_round_trips_zbin32() {
        let header = Header::new(Encoding::ZBIN32, Frame::ZRINIT, [1, 2, 3, 4]);
        let decoded = round_trip(
            |w| header.write(w),
            |r| {
                read_zpad(r, Duration::from_millis(100))?;
                Header::read(r, Duration::from_millis(100))
            },
        );
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_round_trips_zhex() {
        let header = Header::new(Encoding::ZHEX, Frame::ZRPOS, [0, 0, 16, 0]);
        let decoded = round_trip(
            |w| header.write(w),
            |r| {
                read_zpad(r, Duration::from_millis(100))?;
                Header::read(r, Duration::from_millis(100))
            },
        );
        assert_eq!(decoded, header);
        assert_eq!(decoded.count(), u32::from_le_bytes([0, 0, 16, 0]));
    }

    #[test]
    fn subpacket_round_trips() {
        let (terminator, payload) = round_trip(
            |w| write_subpacket(w, Encoding::ZBIN32, Packet::ZCRCW, b"hello"),
            |r| read_subpacket(r, Encoding::ZBIN32, Duration::from_millis(100)),
        );
        assert_eq!(terminator, Packet::ZCRCW);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn tampered_subpacket_fails_crc() {
        let mut writer = Channel::new(empty_port(), cancel());
        write_subpacket(&mut writer, Encoding::ZBIN32, Packet::ZCRCE, b"hello").unwrap();
        writer.flush().unwrap();
        let mut bytes = writer.into_port().outbox;
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;

        let mut reader = Channel::new(
            LoopPort {
                inbox: bytes.into_iter().collect(),
                outbox: Vec::new(),
            },
            cancel(),
        );
        assert!(read_subpacket(&mut reader, Encoding::ZBIN32, Duration::from_millis(100)).is_err());
    }
}
