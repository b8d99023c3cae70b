//! Classic Diffie-Hellman key agreement.
//!
//! The handshake negotiates a per-connection session key over a 1024-bit
//! safe-prime group with generator 2. Primes, public keys, and the
//! generator all travel as ASCII hex; the shared secret is the 128-byte
//! big-endian value both sides derive.

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::rngs::OsRng;
use rand::Rng;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::{DH_KEY_BIT_SIZE, DH_KEY_HEX_SIZE, DH_SHARED_DATA_SIZE};

/// Miller-Rabin rounds for parameter generation and validation.
const PRIMALITY_ROUNDS: usize = 25;

/// The first few odd primes, used to sieve candidates before the expensive
/// probabilistic test.
const SMALL_PRIMES: [u32; 46] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199, 211,
];

/// A Diffie-Hellman parameter set: the prime, the generator, and (after
/// [`generate_public`](DiffieHellman::generate_public)) a key pair.
///
/// Cloning duplicates the prime and generator only; the clone has no key
/// pair. This is how a server shares one parameter template across every
/// accepted connection.
pub struct DiffieHellman {
    prime: BigUint,
    base: BigUint,
    private_key: Option<BigUint>,
    public_key: Option<BigUint>,
}

impl Clone for DiffieHellman {
    fn clone(&self) -> Self {
        Self {
            prime: self.prime.clone(),
            base: self.base.clone(),
            private_key: None,
            public_key: None,
        }
    }
}

impl std::fmt::Debug for DiffieHellman {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffieHellman")
            .field("bits", &self.prime.bits())
            .field("has_key_pair", &self.private_key.is_some())
            .finish()
    }
}

impl DiffieHellman {
    /// Generate a fresh 1024-bit safe-prime parameter set.
    ///
    /// This searches for p = 2q + 1 with both p and q prime and
    /// p ≡ 11 (mod 24) (the generator-2 acceptance), then validates the
    /// result like [`check`](Self::check). Expect this to take a while; a
    /// server normally does it once and pins the prime in configuration.
    ///
    /// # Errors
    ///
    /// Fails with [`CryptoError::InvalidParameters`] if the generated set
    /// does not validate (which indicates a broken entropy source).
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_with_bits(DH_KEY_BIT_SIZE)
    }

    fn generate_with_bits(bits: u64) -> Result<Self, CryptoError> {
        let mut rng = OsRng;

        loop {
            // q ≡ 5 (mod 12) makes p = 2q + 1 ≡ 11 (mod 24).
            let mut q = rng.gen_biguint(bits - 1);
            q.set_bit(bits - 2, true);
            q = &q - (&q % 12u32) + 5u32;

            if q.bits() != bits - 1 {
                continue;
            }

            if SMALL_PRIMES.iter().any(|&p| (&q % p).is_zero()) {
                continue;
            }

            let p = (&q << 1u32) + BigUint::one();

            if SMALL_PRIMES.iter().any(|&small| (&p % small).is_zero()) {
                continue;
            }

            if !is_probably_prime(&q, PRIMALITY_ROUNDS, &mut rng)
                || !is_probably_prime(&p, PRIMALITY_ROUNDS, &mut rng)
            {
                continue;
            }

            let params = Self {
                prime: p,
                base: BigUint::from(2u8),
                private_key: None,
                public_key: None,
            };

            if params.size() as u64 != bits / 8 {
                return Err(CryptoError::InvalidParameters);
            }

            return Ok(params);
        }
    }

    /// Load a parameter set from a 256-character hex prime, with the fixed
    /// generator 2.
    ///
    /// No primality validation is performed; this is the path used for
    /// primes received over the wire or pinned in configuration.
    ///
    /// # Errors
    ///
    /// Fails with [`CryptoError::InvalidPrime`] if the string is not
    /// exactly [`DH_KEY_HEX_SIZE`] hex characters or does not decode to a
    /// 128-byte value.
    pub fn load_prime_hex(prime_hex: &str) -> Result<Self, CryptoError> {
        if prime_hex.len() != DH_KEY_HEX_SIZE {
            return Err(CryptoError::InvalidPrime);
        }

        let prime = BigUint::parse_bytes(prime_hex.as_bytes(), 16)
            .ok_or(CryptoError::InvalidPrime)?;

        Self::from_prime(prime)
    }

    /// Load a parameter set from the 128-byte big-endian prime encoding.
    ///
    /// # Errors
    ///
    /// Fails with [`CryptoError::InvalidPrime`] if the slice is not
    /// exactly [`DH_SHARED_DATA_SIZE`] bytes or has a zero leading byte.
    pub fn load_prime_bytes(prime: &[u8]) -> Result<Self, CryptoError> {
        if prime.len() != DH_SHARED_DATA_SIZE {
            return Err(CryptoError::InvalidPrime);
        }

        Self::from_prime(BigUint::from_bytes_be(prime))
    }

    fn from_prime(prime: BigUint) -> Result<Self, CryptoError> {
        let params = Self {
            prime,
            base: BigUint::from(2u8),
            private_key: None,
            public_key: None,
        };

        if params.size() != DH_SHARED_DATA_SIZE {
            return Err(CryptoError::InvalidPrime);
        }

        Ok(params)
    }

    /// The 128-byte big-endian encoding of the prime.
    ///
    /// # Errors
    ///
    /// Fails with [`CryptoError::InvalidPrime`] if the prime does not
    /// occupy exactly [`DH_SHARED_DATA_SIZE`] bytes.
    pub fn save_prime_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        let bytes = self.prime.to_bytes_be();

        if bytes.len() != DH_SHARED_DATA_SIZE {
            return Err(CryptoError::InvalidPrime);
        }

        Ok(bytes)
    }

    /// The 256-character uppercase hex encoding of the prime.
    ///
    /// # Errors
    ///
    /// Fails with [`CryptoError::InvalidPrime`] if the prime does not
    /// encode to exactly [`DH_KEY_HEX_SIZE`] characters.
    pub fn prime_hex(&self) -> Result<String, CryptoError> {
        let hex = right_justified(format!("{:X}", self.prime), DH_KEY_HEX_SIZE);

        if hex.len() != DH_KEY_HEX_SIZE {
            return Err(CryptoError::InvalidPrime);
        }

        Ok(hex)
    }

    /// Byte size of the prime, which is also the shared secret size.
    #[must_use]
    pub fn size(&self) -> usize {
        ((self.prime.bits() + 7) / 8) as usize
    }

    /// Validate the parameter set the way the handshake requires: p and
    /// (p - 1) / 2 both prime, and p ≡ 11 (mod 24) for generator 2.
    #[must_use]
    pub fn check(&self) -> bool {
        let mut rng = OsRng;

        if self.prime.bits() < 3 || (&self.prime % 2u32).is_zero() {
            return false;
        }

        if self.base == BigUint::from(2u8) && &self.prime % 24u32 != BigUint::from(11u8) {
            return false;
        }

        let q: BigUint = &self.prime >> 1u32;

        is_probably_prime(&self.prime, PRIMALITY_ROUNDS, &mut rng)
            && is_probably_prime(&q, PRIMALITY_ROUNDS, &mut rng)
    }

    /// Generate a key pair and return the public key as 256 uppercase hex
    /// characters, right-padded with `'0'`.
    ///
    /// # Errors
    ///
    /// Fails with [`CryptoError::InvalidParameters`] if the prime is too
    /// small to derive a key from.
    pub fn generate_public(&mut self) -> Result<String, CryptoError> {
        let mut rng = OsRng;
        let bits = self.prime.bits();

        if bits < 3 {
            return Err(CryptoError::InvalidParameters);
        }

        let private_key = loop {
            let candidate = rng.gen_biguint(bits - 1);

            if candidate > BigUint::one() {
                break candidate;
            }
        };

        let public_key = self.base.modpow(&private_key, &self.prime);
        let hex = right_justified(format!("{public_key:X}"), DH_KEY_HEX_SIZE);

        if hex.len() != DH_KEY_HEX_SIZE {
            return Err(CryptoError::InvalidParameters);
        }

        self.private_key = Some(private_key);
        self.public_key = Some(public_key);
        Ok(hex)
    }

    /// Derive the 128-byte shared secret from the peer's public key.
    ///
    /// The value is left-padded with zeros to exactly
    /// [`DH_SHARED_DATA_SIZE`] bytes so both sides always derive identical
    /// buffers.
    ///
    /// # Errors
    ///
    /// Fails if no key pair has been generated, or if the peer public key
    /// has the wrong length, does not parse, or is outside (1, p - 1).
    pub fn shared_secret(&self, other_public_hex: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let private_key = self
            .private_key
            .as_ref()
            .ok_or(CryptoError::MissingPrivateKey)?;

        if other_public_hex.len() != DH_KEY_HEX_SIZE {
            return Err(CryptoError::InvalidPublicKey);
        }

        let other_public = BigUint::parse_bytes(other_public_hex.as_bytes(), 16)
            .ok_or(CryptoError::InvalidPublicKey)?;

        if other_public <= BigUint::one() || other_public >= &self.prime - 1u32 {
            return Err(CryptoError::InvalidPublicKey);
        }

        let shared = other_public.modpow(private_key, &self.prime);
        let bytes = shared.to_bytes_be();

        if bytes.len() > DH_SHARED_DATA_SIZE {
            return Err(CryptoError::InvalidPublicKey);
        }

        let mut secret = Zeroizing::new(vec![0u8; DH_SHARED_DATA_SIZE]);
        secret[DH_SHARED_DATA_SIZE - bytes.len()..].copy_from_slice(&bytes);
        Ok(secret)
    }
}

/// Raw modular exponentiation over hex-encoded values: `g^a mod p`.
///
/// Returns the uppercase hex result, right-padded with `'0'` to
/// `output_size` when `output_size` is non-zero. This is the helper the
/// asset tools use for custom group sizes.
///
/// # Errors
///
/// Fails with [`CryptoError::InvalidParameters`] if any value does not
/// parse as hex or the modulus is zero.
pub fn mod_exp_hex(
    base_hex: &str,
    prime_hex: &str,
    exponent_hex: &str,
    output_size: usize,
) -> Result<String, CryptoError> {
    let base =
        BigUint::parse_bytes(base_hex.as_bytes(), 16).ok_or(CryptoError::InvalidParameters)?;
    let prime =
        BigUint::parse_bytes(prime_hex.as_bytes(), 16).ok_or(CryptoError::InvalidParameters)?;
    let exponent =
        BigUint::parse_bytes(exponent_hex.as_bytes(), 16).ok_or(CryptoError::InvalidParameters)?;

    if prime.is_zero() {
        return Err(CryptoError::InvalidParameters);
    }

    let result = base.modpow(&exponent, &prime);

    if output_size > 0 {
        Ok(right_justified(format!("{result:X}"), output_size))
    } else {
        Ok(format!("{result:X}"))
    }
}

fn right_justified(value: String, width: usize) -> String {
    if value.len() >= width {
        value
    } else {
        let mut padded = "0".repeat(width - value.len());
        padded.push_str(&value);
        padded
    }
}

fn is_probably_prime<R: Rng>(candidate: &BigUint, rounds: usize, rng: &mut R) -> bool {
    let two = BigUint::from(2u8);
    let three = BigUint::from(3u8);

    if candidate < &two {
        return false;
    }

    if candidate == &two || candidate == &three {
        return true;
    }

    if (candidate % 2u32).is_zero() {
        return false;
    }

    for &small in &SMALL_PRIMES {
        if (candidate % small).is_zero() {
            return candidate == &BigUint::from(small);
        }
    }

    let n_minus_one = candidate - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d: BigUint = &n_minus_one >> s;
    let upper = candidate - 2u32;

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &upper);
        let mut x = a.modpow(&d, candidate);

        if x.is_one() || x == n_minus_one {
            continue;
        }

        for _ in 1..s {
            x = (&x * &x) % candidate;

            if x == n_minus_one {
                continue 'witness;
            }
        }

        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miller_rabin_agrees_with_known_values() {
        let mut rng = OsRng;

        for prime in [2u32, 3, 5, 213, 65537, 2147483647] {
            let expected = prime != 213;
            assert_eq!(
                is_probably_prime(&BigUint::from(prime), 25, &mut rng),
                expected,
                "candidate {prime}"
            );
        }

        // Carmichael numbers fool Fermat, not Miller-Rabin.
        assert!(!is_probably_prime(&BigUint::from(561u32), 25, &mut rng));
        assert!(!is_probably_prime(&BigUint::from(41041u32), 25, &mut rng));
    }

    #[test]
    fn generated_group_validates_and_exchanges() {
        // A small group keeps this fast; generate() uses the same path at
        // the full 1024 bits.
        let params = DiffieHellman::generate_with_bits(256).unwrap();
        assert!(params.check());
        assert_eq!(&params.prime % 24u32, BigUint::from(11u8));

        let mut alice = params.clone();
        let mut bob = params.clone();

        let alice_public = alice.generate_public().unwrap();
        let bob_public = bob.generate_public().unwrap();
        assert_eq!(alice_public.len(), DH_KEY_HEX_SIZE);

        let alice_shared = alice.shared_secret(&bob_public).unwrap();
        let bob_shared = bob.shared_secret(&alice_public).unwrap();
        assert_eq!(alice_shared.as_slice(), bob_shared.as_slice());
        assert_eq!(alice_shared.len(), DH_SHARED_DATA_SIZE);
    }

    #[test]
    fn clone_drops_the_key_pair() {
        let mut params = DiffieHellman::generate_with_bits(256).unwrap();
        params.generate_public().unwrap();

        let copy = params.clone();
        assert!(copy.shared_secret(&"0".repeat(DH_KEY_HEX_SIZE)).is_err());
    }

    #[test]
    #[ignore = "searches for a full 1024-bit safe prime; takes minutes"]
    fn full_size_generation() {
        let params = DiffieHellman::generate().unwrap();
        assert_eq!(params.size(), DH_SHARED_DATA_SIZE);
        assert_eq!(params.prime_hex().unwrap().len(), DH_KEY_HEX_SIZE);
        assert!(params.check());
    }

    #[test]
    fn mod_exp_hex_matches_hand_computation() {
        // 4^13 mod 497 = 445 = 0x1BD
        assert_eq!(mod_exp_hex("4", "1F1", "D", 0).unwrap(), "1BD");
        assert_eq!(mod_exp_hex("4", "1F1", "D", 8).unwrap(), "000001BD");
    }

    #[test]
    fn mod_exp_hex_rejects_bad_arguments() {
        assert!(mod_exp_hex("Z", "200", "3", 0).is_err());
        assert!(mod_exp_hex("a", "^", "3", 0).is_err());
        assert!(mod_exp_hex("a", "200", "*", 0).is_err());
        assert!(mod_exp_hex("a", "0", "3", 0).is_err());
    }

    #[test]
    fn shared_secret_rejects_out_of_range_public() {
        let mut params = DiffieHellman::generate_with_bits(256).unwrap();
        params.generate_public().unwrap();

        assert!(params.shared_secret(&"0".repeat(DH_KEY_HEX_SIZE)).is_err());
        assert!(params.shared_secret(&"1".repeat(255)).is_err());
        assert!(params
            .shared_secret(&params.prime_hex().unwrap())
            .is_err());
    }
}
