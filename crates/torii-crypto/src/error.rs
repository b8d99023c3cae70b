//! Error types for the crypto layer.

use thiserror::Error;
use torii_codec::PacketError;

/// Cryptographic failures.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A packet operation failed while framing or unframing.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// Diffie-Hellman parameters failed validation.
    #[error("invalid Diffie-Hellman parameters")]
    InvalidParameters,

    /// A prime did not have the expected encoding or size.
    #[error("invalid Diffie-Hellman prime")]
    InvalidPrime,

    /// The peer's public key was malformed or out of range.
    #[error("invalid peer public key")]
    InvalidPublicKey,

    /// A shared secret was requested before a key pair was generated.
    #[error("no private key has been generated")]
    MissingPrivateKey,

    /// A Blowfish key outside the 4..=56 byte range.
    #[error("invalid Blowfish key length: {0}")]
    KeyLength(usize),

    /// Data handed to a block operation was not block aligned.
    #[error("data length {0} is not a multiple of the cipher block size")]
    BlockAlignment(usize),

    /// An encrypted file failed its header or size validation.
    #[error("encrypted file is corrupt or truncated")]
    MalformedFile,

    /// An odd number of hex digits was requested from the random source.
    #[error("requested an odd number of random hex digits: {0}")]
    OddRandomSize(usize),

    /// The OS entropy source failed.
    #[error("random source failed")]
    RandomSource,

    /// An I/O failure while reading or writing an encrypted file.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
