//! String conversion between UTF-8 and the client code pages.
//!
//! UTF-8 is the internal representation. The proprietary client exchanges
//! strings in CP-1252 and CP-932 (the Windows Shift-JIS variant); both are
//! translated through [`encoding_rs`], whose tables are generated from the
//! canonical Unicode mapping data. A code point without a mapping in either
//! direction is a [`ConversionError`] — the caller decides whether that is
//! a protocol violation.

use std::borrow::Cow;

use crate::error::ConversionError;

/// A string encoding understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8, the internal representation (identity conversion).
    Utf8,
    /// Windows code page 1252 (Latin alphabet), single byte.
    Cp1252,
    /// Windows code page 932 (Shift-JIS variant), one or two bytes per
    /// code point with the second byte in big-endian order.
    Cp932,
}

impl Encoding {
    fn codec(self) -> Option<&'static encoding_rs::Encoding> {
        match self {
            Self::Utf8 => None,
            Self::Cp1252 => Some(encoding_rs::WINDOWS_1252),
            Self::Cp932 => Some(encoding_rs::SHIFT_JIS),
        }
    }
}

/// Convert a UTF-8 string into `encoding`, optionally appending a NUL
/// terminator.
///
/// # Errors
///
/// Returns [`ConversionError::Unmappable`] if any code point has no mapping
/// in the target code page.
pub fn to_encoding(
    encoding: Encoding,
    string: &str,
    null_terminated: bool,
) -> Result<Vec<u8>, ConversionError> {
    let mut bytes = match encoding.codec() {
        None => string.as_bytes().to_vec(),
        Some(codec) => {
            let (converted, _, had_errors) = codec.encode(string);
            if had_errors {
                return Err(ConversionError::Unmappable(encoding));
            }
            converted.into_owned()
        }
    };

    if null_terminated {
        bytes.push(0);
    }

    Ok(bytes)
}

/// Convert bytes in `encoding` back into a UTF-8 string.
///
/// Conversion stops at the first NUL byte, matching the wire convention of
/// NUL-terminated fields whose length prefix includes the terminator.
///
/// # Errors
///
/// Returns [`ConversionError::Malformed`] if the bytes are not a valid
/// sequence in the code page.
pub fn from_encoding(encoding: Encoding, bytes: &[u8]) -> Result<String, ConversionError> {
    let bytes = match bytes.iter().position(|&b| b == 0) {
        Some(terminator) => &bytes[..terminator],
        None => bytes,
    };

    match encoding.codec() {
        None => std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ConversionError::Malformed(encoding)),
        Some(codec) => codec
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(Cow::into_owned)
            .ok_or(ConversionError::Malformed(encoding)),
    }
}

/// Size in bytes of `string` once converted to `encoding`, without a
/// terminator, rounded up to a multiple of `align` when `align` is
/// non-zero.
///
/// # Errors
///
/// Returns [`ConversionError::Unmappable`] if the string cannot be
/// converted.
pub fn encoded_size(
    encoding: Encoding,
    string: &str,
    align: usize,
) -> Result<usize, ConversionError> {
    let size = to_encoding(encoding, string, false)?.len();

    if align > 0 {
        Ok(size.div_ceil(align) * align)
    } else {
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_is_identity() {
        let bytes = to_encoding(Encoding::Utf8, "hello", false).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(from_encoding(Encoding::Utf8, &bytes).unwrap(), "hello");
    }

    #[test]
    fn null_terminator_is_appended_and_stripped() {
        let bytes = to_encoding(Encoding::Cp1252, "abc", true).unwrap();
        assert_eq!(bytes, b"abc\0");
        assert_eq!(from_encoding(Encoding::Cp1252, &bytes).unwrap(), "abc");
    }

    #[test]
    fn cp932_mixed_width_round_trip() {
        let text = "This is CP-932 encoding: 日本語が大好き！";
        let bytes = to_encoding(Encoding::Cp932, text, true).unwrap();

        // 25 ASCII bytes, 8 double-byte code points, one terminator.
        assert_eq!(bytes.len(), 42);
        assert_eq!(&bytes[..25], b"This is CP-932 encoding: ");
        assert_eq!(bytes[41], 0);

        assert_eq!(from_encoding(Encoding::Cp932, &bytes).unwrap(), text);
    }

    #[test]
    fn cp1252_round_trip_with_high_bytes() {
        let text = "café — naïve";
        let bytes = to_encoding(Encoding::Cp1252, text, false).unwrap();
        assert_eq!(from_encoding(Encoding::Cp1252, &bytes).unwrap(), text);
    }

    #[test]
    fn unmappable_code_point_is_an_error() {
        assert_eq!(
            to_encoding(Encoding::Cp1252, "日本語", false),
            Err(ConversionError::Unmappable(Encoding::Cp1252))
        );
    }

    #[test]
    fn malformed_cp932_is_an_error() {
        // A lead byte with no trail byte.
        assert_eq!(
            from_encoding(Encoding::Cp932, &[0x93]),
            Err(ConversionError::Malformed(Encoding::Cp932))
        );
    }

    #[test]
    fn encoded_size_aligns() {
        assert_eq!(encoded_size(Encoding::Utf8, "abc", 0).unwrap(), 3);
        assert_eq!(encoded_size(Encoding::Utf8, "abc", 4).unwrap(), 4);
        assert_eq!(encoded_size(Encoding::Cp932, "日本語", 0).unwrap(), 6);
    }
}
