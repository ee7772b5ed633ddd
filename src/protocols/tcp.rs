//! An implementation of the [Transmission Control
//! Protocol](https://www.rfc-editor.org/rfc/rfc9293.html) receive path,
//! minimal enough to host the forward error correction engine in [`fec`]
//! as a sidecar. See [`tcb::Tcb`] for the connection state machine and
//! [`fec`] for the FEC engine itself.

pub mod fec;
pub mod header;
pub mod tcb;
