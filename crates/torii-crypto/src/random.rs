//! OS-entropy helpers.
//!
//! All randomness comes from the operating system CSPRNG via `getrandom`.

use crate::error::CryptoError;

/// Default number of hex digits returned by [`generate_random`].
pub const DEFAULT_RANDOM_DIGITS: usize = 80;

/// Session key substituted for the (astronomically unlikely) zero draw.
const SESSION_KEY_FALLBACK: u32 = 0x8BAD_F00D;

/// Generate `digits` lowercase hex digits of OS entropy.
///
/// `digits` must be even since each byte of entropy yields two digits;
/// zero selects the default of [`DEFAULT_RANDOM_DIGITS`].
///
/// # Errors
///
/// Fails with [`CryptoError::OddRandomSize`] for an odd count, or
/// [`CryptoError::RandomSource`] if the OS entropy source fails.
pub fn generate_random(digits: usize) -> Result<String, CryptoError> {
    if digits % 2 != 0 {
        return Err(CryptoError::OddRandomSize(digits));
    }

    let digits = if digits == 0 {
        DEFAULT_RANDOM_DIGITS
    } else {
        digits
    };

    let mut bytes = vec![0u8; digits / 2];
    getrandom::getrandom(&mut bytes).map_err(|_| CryptoError::RandomSource)?;

    let mut out = String::with_capacity(digits);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }

    Ok(out)
}

/// Generate a random session identifier.
///
/// The value is masked to 31 bits so it can never be read as a negative
/// number, and the zero draw is replaced with a fixed sentinel.
///
/// # Errors
///
/// Fails with [`CryptoError::RandomSource`] if the OS entropy source
/// fails.
pub fn generate_session_key() -> Result<u32, CryptoError> {
    let mut bytes = [0u8; 4];
    getrandom::getrandom(&mut bytes).map_err(|_| CryptoError::RandomSource)?;

    let key = u32::from_ne_bytes(bytes) & 0x7FFF_FFFF;

    Ok(if key == 0 { SESSION_KEY_FALLBACK } else { key })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_eighty_digits() {
        assert_eq!(generate_random(0).unwrap().len(), DEFAULT_RANDOM_DIGITS);
    }

    #[test]
    fn odd_count_is_an_error() {
        assert!(matches!(
            generate_random(3),
            Err(CryptoError::OddRandomSize(3))
        ));
    }

    #[test]
    fn output_is_lowercase_hex_of_requested_length() {
        let token = generate_random(20).unwrap();
        assert_eq!(token.len(), 20);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn output_changes_between_calls() {
        assert_ne!(generate_random(80).unwrap(), generate_random(80).unwrap());
    }

    #[test]
    fn session_keys_are_positive() {
        for _ in 0..1000 {
            let key = generate_session_key().unwrap();
            assert!(key > 0);
            assert!(key <= 0x7FFF_FFFF || key == 0x8BAD_F00D);
        }
    }
}
