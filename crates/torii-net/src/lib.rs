//! # torii net
//!
//! The connection-oriented, length-framed, encrypted wire protocol between
//! the proprietary client and the lobby/channel servers.
//!
//! This crate provides:
//! - [`Connection`] — the per-connection handshake state machine, frame
//!   codec, and in-frame command demultiplexer
//! - [`Server`] — the accept loop sharing one Diffie-Hellman parameter set
//!   across connections
//! - [`MessageQueue`] and [`Message`] — the boundary over which decrypted
//!   commands reach the embedding application
//! - [`RingBuffer`] — a lock-free SPSC byte queue over a doubly-mapped
//!   region for I/O staging
//!
//! ## Connection lifecycle
//!
//! ```text
//! client:  NotConnected → Connecting → Connected → WaitingEncryption → Encrypted
//! server:                              Connected → WaitingEncryption → Encrypted
//! ```
//!
//! A freshly connected socket runs an anonymous Diffie-Hellman exchange
//! and installs the first 8 bytes of the shared secret as the Blowfish
//! session key; everything after travels in zero-padded, ECB-encrypted
//! frames multiplexing one or more commands.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod connection;
pub mod error;
pub mod message;
pub mod ring_buffer;
pub mod server;

pub use connection::{Connection, Role, Status};
pub use error::NetError;
pub use message::{Message, MessageQueue};
pub use ring_buffer::{RingBuffer, RingConsumer, RingProducer};
pub use server::Server;

pub use torii_codec::MAX_PACKET_SIZE;

use std::time::Duration;

/// How long the client is expected to idle before disconnecting on its
/// own. The core exposes this for supervisors; it does not arm it.
pub const TIMEOUT_CLIENT: Duration = Duration::from_secs(15);

/// How long the server should wait past [`TIMEOUT_CLIENT`] before forcing
/// the socket closed. The core exposes this for supervisors; it does not
/// arm it.
pub const TIMEOUT_SOCKET: Duration = Duration::from_secs(17);
