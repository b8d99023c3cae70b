//! Error types for the connection layer.

use thiserror::Error;
use torii_codec::PacketError;
use torii_crypto::CryptoError;

/// Failures raised by connections, the server, and the ring buffer.
#[derive(Debug, Error)]
pub enum NetError {
    /// A packet operation failed while parsing or building a frame.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// A cryptographic operation failed during the handshake or framing.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The peer violated the wire protocol. Fatal for the connection.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The underlying socket failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The ring buffer's doubly-mapped region could not be constructed.
    #[error("memory map failed: {0}")]
    MemoryMap(String),

    /// The configured listen address could not be parsed.
    #[error("invalid listen address: {0}")]
    ListenAddress(String),

    /// An operation was attempted in a connection state that cannot
    /// service it.
    #[error("connection is not in a valid state for the operation")]
    InvalidState,
}
