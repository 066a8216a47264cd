//! Ymodem block-0 metadata encode/decode.
//!
//! Payload: a NUL-terminated filename, then space-separated decimal
//! `size`, octal `mtime`, octal `mode`, decimal `serial`. All but the
//! name and size are optional, matching real-world senders that
//! populate only name/size.

use std::time::{Duration, SystemTime};

/// Parsed contents of block 0. An all-zero/empty block signals end of
/// batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block0Meta {
    pub name: String,
    pub size: u64,
    pub mtime: Option<u64>,
    pub mode: Option<u32>,
    pub serial: Option<u64>,
}

impl Block0Meta {
    #[must_use]
    pub fn end_of_batch() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_end_of_batch(&self) -> bool {
        self.name.is_empty()
    }

    /// Encodes into a block-0 payload (not yet padded to the block size).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        if self.is_end_of_batch() {
            return Vec::new();
        }
        let mut out = Vec::new();
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        let mut fields = vec![self.size.to_string()];
        if let Some(mtime) = self.mtime {
            fields.push(format!("{mtime:o}"));
        }
        if let Some(mode) = self.mode {
            fields.push(format!("{mode:o}"));
        }
        if let Some(serial) = self.serial {
            fields.push(serial.to_string());
        }
        out.extend_from_slice(fields.join(" ").as_bytes());
        out.push(0);
        out
    }

    /// Decodes a (possibly NUL-padded) block-0 payload.
    #[must_use]
    pub fn decode(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let mut parts = text.splitn(2, '\0');
        let name = parts.next().unwrap_or("").trim_end_matches('\0').to_string();
        if name.is_empty() {
            return Self::end_of_batch();
        }
        let rest = parts.next().unwrap_or("");
        let rest = rest.trim_matches('\0');
        let mut fields = rest.split_ascii_whitespace();
        let size = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let mtime = fields.next().and_then(|s| u64::from_str_radix(s, 8).ok());
        let mode = fields
            .next()
            .and_then(|s| u32::from_str_radix(s, 8).ok());
        let serial = fields.next().and_then(|s| s.parse().ok());
        Self {
            name,
            size,
            mtime,
            mode,
            serial,
        }
    }

    /// The `mtime` field as a `SystemTime`, if present.
    #[must_use]
    pub fn mtime_as_system_time(&self) -> Option<SystemTime> {
        self.mtime
            .map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_name_and_size() {
        let meta = Block0Meta {
            name: "a.txt".into(),
            size: 5,
            mtime: None,
            mode: None,
            serial: None,
        };
        let encoded = meta.encode();
        let decoded = Block0Meta::decode(&encoded);
        assert_eq!(decoded.name, "a.txt");
        assert_eq!(decoded.size, 5);
    }

    #[test]
    fn round_trips_full_metadata() {
        let meta = Block0Meta {
            name: "b.bin".into(),
            size: 256,
            mtime: Some(0o17172717),
            mode: Some(0o100644),
            serial: Some(7),
        };
        let decoded = Block0Meta::decode(&meta.encode());
        assert_eq!(decoded, meta);
    }

    #[test]
    fn empty_block_is_end_of_batch() {
        let decoded = Block0Meta::decode(&[0u8; 128]);
        assert!(decoded.is_end_of_batch());
    }
}
