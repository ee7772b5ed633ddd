//! Structured logging for the FEC engine.
//!
//! This module only emits events; it does not install a subscriber. An
//! embedding application is expected to set up its own `tracing` subscriber,
//! the way any library crate should.

use tracing::{event, Level};

/// Logged when a parity packet lets the receiver reconstruct a lost segment.
pub fn recovery_succeeded(enc_seq: u32, enc_len: u32, recovered_len: usize) {
    event!(
        target: "fec::recovery",
        Level::DEBUG,
        enc_seq,
        enc_len,
        recovered_len,
        "FEC recovery succeeded"
    );
}

/// Logged when a parity packet cannot account for the missing bytes.
pub fn recovery_failed(enc_seq: u32, enc_len: u32, lost_seq: u32, lost_len: u32) {
    event!(
        target: "fec::recovery",
        Level::INFO,
        enc_seq,
        enc_len,
        lost_seq,
        lost_len,
        "FEC recovery failed, asserting loss range"
    );
}

/// Logged whenever the reference window evicts a retained segment.
pub fn window_evicted(seq: u32, len: usize, bytes_after: usize) {
    event!(
        target: "fec::window",
        Level::TRACE,
        seq,
        len,
        bytes_after,
        "evicted retained segment from reference window"
    );
}

/// Logged when FEC is disabled on a connection, whatever the reason.
pub fn disabled(reason: &'static str) {
    event!(target: "fec::lifecycle", Level::INFO, reason, "FEC disabled on connection");
}
