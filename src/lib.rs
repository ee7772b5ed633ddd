//! A receiver-side Forward Error Correction engine for a reliable,
//! TCP-compatible stream transport.
//!
//! This crate implements a minimal RFC 9293 receive-side state machine
//! ([`protocols::tcp::tcb::Tcb`]) and layers an FEC sidecar on top of it: when
//! a sender transmits parity packets covering recent data segments, the
//! receiver here can reconstruct a lost segment from the parity payload and
//! the segments it still has, without waiting for a retransmission timeout.
//!
//! # Organization
//!
//! - [`message`] is the zero-copy byte collection segments are built from.
//! - [`protocols::tcp`] holds the TCP state machine, header parsing, and
//!   the `fec` sidecar module, which is the core of this crate.

mod logging;
pub mod message;
pub mod protocols;

pub use message::Message;
pub use protocols::tcp::fec;
pub use protocols::tcp::tcb::Tcb;
