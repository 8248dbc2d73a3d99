//! Transport Layer
//!
//! The transport-independent half of the client protocol:
//! - `codec`: JSON encoding of inbound commands and outbound events
//! - `dispatch`: per-connection routing of commands to the controller
//!
//! # Design Philosophy
//!
//! The transport layer separates the communication mechanism from the
//! orchestration logic. A server (WebSocket, in-process, test harness) only
//! moves text frames in and out; decoding, dispatch and cleanup on
//! disconnect live here so every transport behaves the same.

pub mod codec;
pub mod dispatch;

pub use codec::{decode_command, encode_event, CodecError, DEFAULT_MAX_MESSAGE_SIZE};
pub use dispatch::CommandDispatcher;
