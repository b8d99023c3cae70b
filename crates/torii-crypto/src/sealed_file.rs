//! The `CHED` at-rest file format.
//!
//! Assets shipped with the server are sealed with Blowfish-CBC under a
//! built-in key and IV. The key and IV are public by design (they ship in
//! every binary); the format identifies and frames the data, it does not
//! protect it from anyone holding the binary.
//!
//! Layout: 4-byte ASCII magic `"CHED"`, little-endian `u32` original size,
//! then the CBC-encrypted payload zero-padded to a block boundary.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use crate::blowfish::BlowfishKey;
use crate::error::CryptoError;
use crate::BLOWFISH_BLOCK_SIZE;

/// Magic identifying an encrypted file.
const ENCRYPTED_FILE_MAGIC: &[u8; 4] = b"CHED";

/// Built-in Blowfish key for file encryption.
const ENCRYPTED_FILE_KEY: &[u8; 16] = b"}]#Su?Y}q!^f*S5O";

/// Built-in CBC initialization vector for file encryption.
const ENCRYPTED_FILE_IV: &[u8; BLOWFISH_BLOCK_SIZE] = b"P[?jd6c4";

/// Byte length of the file header.
const HEADER_SIZE: usize = 8;

fn file_key() -> Result<&'static BlowfishKey, CryptoError> {
    static KEY: OnceLock<BlowfishKey> = OnceLock::new();

    if let Some(key) = KEY.get() {
        return Ok(key);
    }

    let key = BlowfishKey::new(ENCRYPTED_FILE_KEY)?;
    Ok(KEY.get_or_init(|| key))
}

/// Seal `data` into an encrypted file at `path`.
///
/// # Errors
///
/// Fails on I/O errors or if `data` exceeds `u32::MAX` bytes.
pub fn encrypt_file<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<(), CryptoError> {
    let original_size = u32::try_from(data.len()).map_err(|_| CryptoError::MalformedFile)?;

    let mut body = data.to_vec();
    let mut iv = *ENCRYPTED_FILE_IV;
    file_key()?.encrypt_cbc(&mut iv, &mut body);

    let mut contents = Vec::with_capacity(HEADER_SIZE + body.len());
    contents.extend_from_slice(ENCRYPTED_FILE_MAGIC);
    contents.extend_from_slice(&original_size.to_le_bytes());
    contents.extend_from_slice(&body);

    std::fs::write(path, contents)?;
    Ok(())
}

/// Open an encrypted file at `path` and return the original data.
///
/// # Errors
///
/// Fails with [`CryptoError::MalformedFile`] if the magic does not match
/// or the body is shorter than the declared size rounded up to a block
/// boundary, and on I/O errors.
pub fn decrypt_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, CryptoError> {
    let contents = load_file(path, None)?;

    if contents.len() <= HEADER_SIZE {
        return Err(CryptoError::MalformedFile);
    }

    let (header, body) = contents.split_at(HEADER_SIZE);

    if &header[..4] != ENCRYPTED_FILE_MAGIC {
        return Err(CryptoError::MalformedFile);
    }

    let original_size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let padded_size = original_size.div_ceil(BLOWFISH_BLOCK_SIZE) * BLOWFISH_BLOCK_SIZE;

    if body.len() < padded_size {
        return Err(CryptoError::MalformedFile);
    }

    let mut body = body[..padded_size].to_vec();
    let mut iv = *ENCRYPTED_FILE_IV;
    file_key()?.decrypt_cbc(&mut iv, &mut body, original_size);

    Ok(body)
}

/// Read a file, either whole or exactly the first `requested` bytes.
///
/// Reading a fixed prefix works on streams like `/dev/urandom` where a
/// whole-file read would never finish.
///
/// # Errors
///
/// Fails on I/O errors, including short files when `requested` is set.
pub fn load_file<P: AsRef<Path>>(path: P, requested: Option<usize>) -> Result<Vec<u8>, CryptoError> {
    match requested {
        Some(size) => {
            let mut file = File::open(path)?;
            let mut data = vec![0u8; size];
            file.read_exact(&mut data)?;
            Ok(data)
        }
        None => Ok(std::fs::read(path)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_recovers_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asset.ched");
        let payload = b"This is a test file.\n";

        encrypt_file(&path, payload).unwrap();

        // 8-byte header plus the 21-byte payload padded to 24.
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 32);
        assert_eq!(decrypt_file(&path).unwrap(), payload);
    }

    #[test]
    fn round_trip_of_block_aligned_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aligned.ched");
        let payload = [7u8; 64];

        encrypt_file(&path, &payload).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8 + 64);
        assert_eq!(decrypt_file(&path).unwrap(), payload);
    }

    #[test]
    fn header_is_magic_plus_little_endian_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header.ched");

        encrypt_file(&path, &[0u8; 300]).unwrap();

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(&contents[..4], b"CHED");
        assert_eq!(&contents[4..8], &300u32.to_le_bytes());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ched");

        encrypt_file(&path, b"payload").unwrap();
        let mut contents = std::fs::read(&path).unwrap();
        contents[0] = b'X';
        std::fs::write(&path, contents).unwrap();

        assert!(matches!(
            decrypt_file(&path),
            Err(CryptoError::MalformedFile)
        ));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.ched");

        encrypt_file(&path, &[1u8; 32]).unwrap();
        let contents = std::fs::read(&path).unwrap();
        std::fs::write(&path, &contents[..contents.len() - 8]).unwrap();

        assert!(matches!(
            decrypt_file(&path),
            Err(CryptoError::MalformedFile)
        ));
    }

    #[test]
    fn load_file_reads_a_fixed_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, [9u8; 16]).unwrap();

        assert_eq!(load_file(&path, Some(4)).unwrap(), vec![9u8; 4]);
        assert_eq!(load_file(&path, None).unwrap().len(), 16);
        assert!(load_file(&path, Some(32)).is_err());
        assert!(load_file(dir.path().join("missing"), None).is_err());
    }
}
