//! Pure frame codecs: checksums for Xmodem/Ymodem, and the
//! Zmodem header/subpacket wire format.

pub mod checksum;
pub mod zmodem_codec;
