//! Ymodem engine: layered on Xmodem-CRC/1K, adding block-0 metadata,
//! batch transfer, and end-of-batch.

pub mod block0;
mod receiver;
mod sender;

pub use receiver::receive_batch;
pub use sender::{send_batch, QueuedFile};
