//! Error types for the packet codec.

use std::backtrace::Backtrace;
use std::fmt;
use std::panic::Location;

use thiserror::Error;

use crate::dump;
use crate::encoding::Encoding;

/// Errors produced by packet read and write operations.
#[derive(Debug, Error)]
pub enum PacketError {
    /// A read or write ran past the bounds of the packet.
    #[error("{0}")]
    OutOfRange(Box<PacketDiagnostic>),

    /// A string could not be converted to or from a client code page.
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

impl PacketError {
    /// Diagnostic context for an out-of-range failure, if any.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&PacketDiagnostic> {
        match self {
            Self::OutOfRange(diagnostic) => Some(diagnostic),
            Self::Conversion(_) => None,
        }
    }
}

/// Context captured at the site of a failed packet operation.
///
/// No data read from a packet can be trusted, so every bounds violation
/// records enough to debug the malformed peer: the failure message, the
/// `file:line` of the offending call, a best-effort backtrace, and a copy
/// of the packet bytes with the cursor position preserved.
pub struct PacketDiagnostic {
    message: String,
    location: &'static Location<'static>,
    backtrace: Backtrace,
    bytes: Vec<u8>,
    position: u32,
}

impl PacketDiagnostic {
    /// Human-readable description of the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Source file of the failed call.
    #[must_use]
    pub fn file(&self) -> &str {
        self.location.file()
    }

    /// Source line of the failed call.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.location.line()
    }

    /// Backtrace captured when the failure was raised.
    ///
    /// Best effort; resolution depends on `RUST_BACKTRACE`.
    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Snapshot of the packet bytes at the moment of failure.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Cursor position at the moment of failure.
    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Canonical hex dump of the snapshot with the cursor marked.
    #[must_use]
    pub fn hex_dump(&self) -> String {
        dump::render(&self.bytes, self.position)
    }
}

impl fmt::Display for PacketDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}:{}]",
            self.message,
            self.location.file(),
            self.location.line()
        )
    }
}

impl fmt::Debug for PacketDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketDiagnostic")
            .field("message", &self.message)
            .field("location", &self.location)
            .field("position", &self.position)
            .field("bytes", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

#[track_caller]
pub(crate) fn out_of_range(message: String, bytes: &[u8], position: u32) -> PacketError {
    PacketError::OutOfRange(Box::new(PacketDiagnostic {
        message,
        location: Location::caller(),
        backtrace: Backtrace::capture(),
        bytes: bytes.to_vec(),
        position,
    }))
}

/// A string that cannot cross the code-page boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The string contains a code point with no mapping in the code page.
    #[error("string contains a code point with no {0:?} mapping")]
    Unmappable(Encoding),

    /// The byte sequence is not valid in the code page.
    #[error("byte sequence is not valid {0:?}")]
    Malformed(Encoding),
}
