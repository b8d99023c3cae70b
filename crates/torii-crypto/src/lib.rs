//! # torii crypto
//!
//! Cryptographic primitives for the torii wire protocol.
//!
//! This crate provides:
//! - Classic Diffie-Hellman key agreement over a 1024-bit safe-prime group
//!   with generator 2, hex-encoded for the wire
//! - Blowfish ECB/CBC traffic encryption and the packet-level frame
//!   encrypt/decrypt operations
//! - The `CHED` at-rest file format consumed by the asset pipeline
//! - OS-entropy helpers for hex tokens and session keys
//!
//! The traffic cipher and the handshake layout are inherited from the
//! proprietary client and must stay bit-exact; none of this is a modern
//! cryptographic design.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blowfish;
pub mod dh;
pub mod error;
pub mod random;
pub mod sealed_file;

pub use blowfish::BlowfishKey;
pub use dh::DiffieHellman;
pub use error::CryptoError;
pub use random::{generate_random, generate_session_key};
pub use sealed_file::{decrypt_file, encrypt_file, load_file};

/// Bit size of the Diffie-Hellman prime.
pub const DH_KEY_BIT_SIZE: u64 = 1024;

/// Length of the hex encoding of a Diffie-Hellman prime or public key.
pub const DH_KEY_HEX_SIZE: usize = 256;

/// Byte length of the Diffie-Hellman shared secret.
pub const DH_SHARED_DATA_SIZE: usize = 128;

/// The fixed Diffie-Hellman generator, as sent on the wire.
pub const DH_BASE_STRING: &str = "2";

/// Blowfish block size in bytes.
pub const BLOWFISH_BLOCK_SIZE: usize = 8;

/// Byte length of a per-connection session key (the leading bytes of the
/// shared secret).
pub const SESSION_KEY_SIZE: usize = 8;
