//! Symmetric encryption for provider access tokens stored at rest.
//!
//! Tokens are encrypted with `simple_crypt` and stored as standard base64 text.

use std::{fmt, string::FromUtf8Error};

use base64::{engine::general_purpose::STANDARD, Engine as _};

#[derive(Debug)]
pub enum Error {
    EncryptFailed(anyhow::Error),
    DecryptFailed(anyhow::Error),
    DecodeFailed(base64::DecodeError),
    StringConversionFailed(FromUtf8Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EncryptFailed(e) => write!(f, "Encryption failed: {e}"),
            Error::DecryptFailed(e) => write!(f, "Decryption failed: {e}"),
            Error::DecodeFailed(e) => write!(f, "Base64 decode failed: {e}"),
            Error::StringConversionFailed(e) => write!(f, "Token is not valid UTF-8: {e}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

pub fn encrypt(value: &str, key: &[u8]) -> Result<String> {
    let encrypted = simple_crypt::encrypt(value.as_bytes(), key).map_err(Error::EncryptFailed)?;
    Ok(STANDARD.encode(encrypted))
}

pub fn decrypt(value: &str, key: &[u8]) -> Result<String> {
    let bytes = STANDARD.decode(value).map_err(Error::DecodeFailed)?;
    let decrypted = simple_crypt::decrypt(&bytes, key).map_err(Error::DecryptFailed)?;
    String::from_utf8(decrypted).map_err(Error::StringConversionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_then_decrypt() {
        let key = b"test-encryption-key";
        let encrypted = encrypt("ya29.access-token", key).unwrap();
        assert_ne!(encrypted, "ya29.access-token");
        assert_eq!(decrypt(&encrypted, key).unwrap(), "ya29.access-token");
    }

    #[test]
    fn test_decrypt_rejects_bad_base64() {
        let result = decrypt("not base64 !!", b"key");
        assert!(matches!(result, Err(Error::DecodeFailed(_))));
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let encrypted = encrypt("secret", b"right-key").unwrap();
        let result = decrypt(&encrypted, b"wrong-key");
        assert!(matches!(result, Err(Error::DecryptFailed(_))));
    }
}
