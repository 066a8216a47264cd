//! Per-protocol timeout and retry knobs.

use std::time::Duration;

/// Tunable limits for a single transfer. Callers override individual
/// fields for testing or for links known to need longer timeouts.
#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    /// Xmodem `VANILLA`/`CRC`/`X_1K`/`X_1K_G` per-block timeout.
    pub xmodem_timeout: Duration,
    /// Xmodem `RELAXED` per-block timeout.
    pub xmodem_relaxed_timeout: Duration,
    /// Consecutive block failures before Xmodem aborts.
    pub xmodem_max_block_errors: u32,
    /// Handshake byte ('C'/'G'/`NAK`) retries before giving up negotiation.
    pub xmodem_handshake_retries: u32,

    /// Ymodem per-block timeout.
    pub ymodem_timeout: Duration,
    /// Consecutive block failures before Ymodem aborts.
    pub ymodem_max_block_errors: u32,

    /// Zmodem per-header timeout.
    pub zmodem_header_timeout: Duration,
    /// Retries of the last logical header before sending `ZABORT`.
    pub zmodem_header_retries: u32,
    /// Subpackets streamed between `ZCRCQ` flow-control acknowledgements.
    pub zmodem_subpackets_per_ack: usize,

    /// Multiplier applied to the active timeout to derive the progress
    /// watchdog window.
    pub watchdog_multiplier: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            xmodem_timeout: Duration::from_secs(10),
            xmodem_relaxed_timeout: Duration::from_secs(60),
            xmodem_max_block_errors: 10,
            xmodem_handshake_retries: 6,

            ymodem_timeout: Duration::from_secs(10),
            ymodem_max_block_errors: 10,

            zmodem_header_timeout: Duration::from_secs(10),
            zmodem_header_retries: 10,
            zmodem_subpackets_per_ack: 16,

            watchdog_multiplier: 2,
        }
    }
}

impl TransferConfig {
    /// The progress watchdog window for the given base timeout: no byte
    /// seen in either direction for this long aborts the transfer.
    #[must_use]
    pub fn watchdog_window(&self, base: Duration) -> Duration {
        base * self.watchdog_multiplier
    }
}
