// SPDX-License-Identifier: MIT OR Apache-2.0
//! `filexfer` implements Xmodem, Ymodem, and Zmodem, the asynchronous
//! serial file-transfer protocol family, over any byte-oriented,
//! potentially lossy link.
//!
//! A [`session::Session`] tracks per-file and per-session progress,
//! errors, and cancel/skip state; [`facade::run`] picks the engine for a
//! session's `(protocol, flavor, direction)` and drives it to a terminal
//! state over a [`wire::Channel`]. Engines never touch `std::fs`
//! directly; they go through [`local_file::LocalFile`] /
//! [`local_file::LocalFileSystem`], so tests can swap in
//! [`local_file::mem::MemFs`].
//!
//! ```text
//! facade::run(channel, transfer, &session, &handle, &config)
//!   -> xmodem::{send, receive}           (single file, fixed block size)
//!    | ymodem::{send_batch, receive_batch} (named batch, block-0 metadata)
//!    | zmodem::{send_batch, receive_batch} (header-driven, windowed)
//! ```

#![deny(clippy::all)]

pub mod config;
pub mod error;
pub mod facade;
pub mod frame;
pub mod local_file;
pub mod session;
pub mod wire;
pub mod xmodem;
pub mod ymodem;
pub mod zmodem;
