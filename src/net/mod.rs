//! TCP wire framing and the PUT/GET server front end.
//!
//! This is the one place in the crate that exposes MouseDB to remote
//! clients. It is deliberately thin: a fixed frame header
//! (`u32 length_be ∥ u16 type_be ∥ u16 reserved`), seven message types
//! (`IDENTIFY`/`HEARTBEAT`/`PEER`/`WRITE_REQ`/`WRITE_RESP`/`READ_REQ`/
//! `READ_RESP`), and a synchronous, thread-per-connection accept loop that
//! dispatches `WRITE_REQ`/`READ_REQ` frames against a shared [`Database`].
//!
//! Consensus and replication are explicit Non-goals (see spec.md §1):
//! `IDENTIFY`/`PEER`/`HEARTBEAT` are accepted and logged, nothing more —
//! there is no peer state machine, gossip protocol, or membership table
//! here. A `--join host:port` flag dials a peer and sends one `IDENTIFY`
//! frame; the connection is then just another client connection from the
//! server's point of view.

pub mod codec;
pub mod server;

pub use codec::{Frame, FrameError, MessageType};
pub use server::{Server, ServerError};
