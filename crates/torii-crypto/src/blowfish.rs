//! Blowfish traffic encryption.
//!
//! The wire protocol inherits Blowfish-ECB from the proprietary client and
//! must match it bit for bit. The client runs the cipher over raw
//! host-order words on x86, which is the little-endian Blowfish schedule,
//! so this module uses [`BlowfishLE`].

use blowfish::cipher::generic_array::GenericArray;
use blowfish::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use blowfish::BlowfishLE;
use torii_codec::Packet;

use crate::error::CryptoError;
use crate::{BLOWFISH_BLOCK_SIZE, SESSION_KEY_SIZE};

/// A scheduled Blowfish key.
///
/// Per-connection session keys are the first [`SESSION_KEY_SIZE`] bytes of
/// the Diffie-Hellman shared secret; the at-rest file format uses a
/// built-in 16-byte key.
#[derive(Clone)]
pub struct BlowfishKey {
    cipher: BlowfishLE,
}

impl BlowfishKey {
    /// Schedule a key from raw bytes (4 to 56 of them).
    ///
    /// # Errors
    ///
    /// Fails with [`CryptoError::KeyLength`] for a key outside that range.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        BlowfishLE::new_from_slice(key)
            .map(|cipher| Self { cipher })
            .map_err(|_| CryptoError::KeyLength(key.len()))
    }

    /// Schedule a session key from the leading [`SESSION_KEY_SIZE`] bytes
    /// of a Diffie-Hellman shared secret.
    ///
    /// # Errors
    ///
    /// Fails with [`CryptoError::KeyLength`] if the secret is shorter than
    /// a session key.
    pub fn session(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        if shared_secret.len() < SESSION_KEY_SIZE {
            return Err(CryptoError::KeyLength(shared_secret.len()));
        }

        Self::new(&shared_secret[..SESSION_KEY_SIZE])
    }

    /// Encrypt `data` in place in ECB mode, zero-padding it up to the next
    /// block boundary first.
    pub fn encrypt(&self, data: &mut Vec<u8>) {
        pad_to_block(data);
        self.encrypt_blocks(data);
    }

    /// Decrypt `data` in place in ECB mode.
    ///
    /// The buffer is only transformed when it is block aligned and at
    /// least `real_size` bytes long; it is then truncated to `real_size`
    /// when `real_size` is non-zero.
    pub fn decrypt(&self, data: &mut Vec<u8>, real_size: usize) {
        if (real_size == 0 || real_size <= data.len()) && data.len() % BLOWFISH_BLOCK_SIZE == 0 {
            self.decrypt_blocks(data);
        }

        if real_size != 0 {
            data.truncate(real_size);
        }
    }

    /// Encrypt `data` in place in CBC mode with an 8-byte IV.
    ///
    /// The buffer is zero-padded up to the next block boundary. `iv` is
    /// updated to the last ciphertext block so chained calls continue the
    /// stream.
    pub fn encrypt_cbc(&self, iv: &mut [u8; BLOWFISH_BLOCK_SIZE], data: &mut Vec<u8>) {
        pad_to_block(data);

        let mut previous = *iv;

        for block in data.chunks_exact_mut(BLOWFISH_BLOCK_SIZE) {
            for (byte, prev) in block.iter_mut().zip(previous.iter()) {
                *byte ^= prev;
            }

            self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
            previous.copy_from_slice(block);
        }

        *iv = previous;
    }

    /// Decrypt `data` in place in CBC mode with an 8-byte IV.
    ///
    /// Mirrors [`decrypt`](Self::decrypt): the buffer is only transformed
    /// when block aligned and long enough, then truncated to `real_size`
    /// when non-zero. `iv` is updated for chained calls.
    pub fn decrypt_cbc(
        &self,
        iv: &mut [u8; BLOWFISH_BLOCK_SIZE],
        data: &mut Vec<u8>,
        real_size: usize,
    ) {
        if (real_size == 0 || real_size <= data.len()) && data.len() % BLOWFISH_BLOCK_SIZE == 0 {
            let mut previous = *iv;

            for block in data.chunks_exact_mut(BLOWFISH_BLOCK_SIZE) {
                let mut encrypted = [0u8; BLOWFISH_BLOCK_SIZE];
                encrypted.copy_from_slice(block);

                self.cipher.decrypt_block(GenericArray::from_mut_slice(block));

                for (byte, prev) in block.iter_mut().zip(previous.iter()) {
                    *byte ^= prev;
                }

                previous = encrypted;
            }

            *iv = previous;
        }

        if real_size != 0 {
            data.truncate(real_size);
        }
    }

    /// Encrypt an outbound frame in place.
    ///
    /// The packet must already contain the 8 reserved size bytes followed
    /// by the payload. This writes `real_size` at offset 4, zero-pads the
    /// payload to a block boundary, ECB-encrypts it, and writes
    /// `padded_size` at offset 0, leaving the cursor at the end.
    ///
    /// # Errors
    ///
    /// Fails if the packet is shorter than the two size fields or if the
    /// padded payload does not fit.
    pub fn encrypt_packet(&self, packet: &mut Packet) -> Result<(), CryptoError> {
        if packet.size() < 8 {
            return Err(CryptoError::BlockAlignment(packet.size() as usize));
        }

        let real_size = packet.size() - 8;
        packet.seek(4)?;
        packet.write_u32_big(real_size)?;

        let padded_size = real_size.div_ceil(BLOWFISH_BLOCK_SIZE as u32) * BLOWFISH_BLOCK_SIZE as u32;

        if real_size != padded_size {
            packet.end();
            packet.write_blank(padded_size - real_size)?;
        }

        self.encrypt_blocks(&mut packet.as_bytes_mut()[8..8 + padded_size as usize]);

        packet.rewind();
        packet.write_u32_big(padded_size)?;
        packet.end();
        Ok(())
    }

    /// Decrypt an inbound frame in place.
    ///
    /// Reads `padded_size` from offset 0 and decrypts that many payload
    /// bytes starting at offset 8. Packets too small to hold the size
    /// fields and one block are left untouched.
    ///
    /// # Errors
    ///
    /// Fails if the declared payload is not block aligned or extends past
    /// the packet.
    pub fn decrypt_packet(&self, packet: &mut Packet) -> Result<(), CryptoError> {
        if (packet.size() as usize) < 2 * 4 + BLOWFISH_BLOCK_SIZE {
            return Ok(());
        }

        packet.rewind();
        let padded_size = packet.read_u32_big()? as usize;

        if padded_size % BLOWFISH_BLOCK_SIZE != 0 || 8 + padded_size > packet.size() as usize {
            return Err(CryptoError::BlockAlignment(padded_size));
        }

        self.decrypt_blocks(&mut packet.as_bytes_mut()[8..8 + padded_size]);
        Ok(())
    }

    fn encrypt_blocks(&self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(BLOWFISH_BLOCK_SIZE) {
            self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
    }

    fn decrypt_blocks(&self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(BLOWFISH_BLOCK_SIZE) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
    }
}

impl std::fmt::Debug for BlowfishKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BlowfishKey(..)")
    }
}

fn pad_to_block(data: &mut Vec<u8>) {
    let remainder = data.len() % BLOWFISH_BLOCK_SIZE;

    if remainder != 0 {
        data.resize(data.len() + BLOWFISH_BLOCK_SIZE - remainder, 0);
    }
}
