//! # torii codec
//!
//! Bounds-checked binary packet buffers for the torii wire protocol.
//!
//! This crate provides:
//! - [`Packet`] — an exclusively-owned, writable 16 KiB byte arena with a
//!   cursor and typed read/write operations in host, big, and little endian
//! - [`ReadOnlyPacket`] — a cheaply clonable, sliceable view sharing a
//!   reference-counted packet backing
//! - Length-prefixed string I/O in UTF-8 and the two client code pages
//!   (CP-1252 and CP-932)
//! - Deflate compress/decompress helpers and a canonical hex dump
//!
//! Every operation is bounds checked. A failed operation returns a
//! [`PacketError`] carrying the throw site, a backtrace, and a snapshot of
//! the offending bytes; it never corrupts the buffer it was called on.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod dump;
pub mod encoding;
pub mod error;
mod packet;
mod surface;
mod view;

pub use encoding::Encoding;
pub use error::{ConversionError, PacketDiagnostic, PacketError};
pub use packet::Packet;
pub use view::ReadOnlyPacket;

/// Maximum number of bytes in a packet.
pub const MAX_PACKET_SIZE: usize = 16384;
