//! AEAD sealing for cookie replies
//!
//! Cookie replies carry the minted cookie encrypted under
//! XChaCha20-Poly1305 with a random 24-byte nonce; the MAC1 of the
//! message being answered rides along as associated data.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};

use crate::error::CryptoError;

/// Authentication tag length
pub const TAG_LEN: usize = 16;

/// XChaCha20-Poly1305 key length
pub const KEY_LEN: usize = 32;

/// XChaCha20-Poly1305 nonce length
pub const XNONCE_LEN: usize = 24;

/// Encrypt using XChaCha20-Poly1305
pub fn xencrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8; XNONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let xnonce = XNonce::from_slice(nonce);

    cipher
        .encrypt(
            xnonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Encryption)
}

/// Decrypt using XChaCha20-Poly1305
///
/// Fails on any authentication-tag mismatch.
pub fn xdecrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8; XNONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption);
    }

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let xnonce = XNonce::from_slice(nonce);

    cipher
        .decrypt(
            xnonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let key = [3u8; 32];
        let nonce = [9u8; 24];
        let plaintext = b"cookie bytes!!!!";
        let aad = b"mac1 of the message";

        let ciphertext = xencrypt(&key, &nonce, plaintext, aad).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);

        let decrypted = xdecrypt(&key, &nonce, &ciphertext, aad).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = [3u8; 32];
        let nonce = [9u8; 24];

        let ciphertext = xencrypt(&key, &nonce, b"secret", b"aad").unwrap();
        assert!(xdecrypt(&[4u8; 32], &nonce, &ciphertext, b"aad").is_err());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = [3u8; 32];
        let nonce = [9u8; 24];

        let ciphertext = xencrypt(&key, &nonce, b"secret", b"correct aad").unwrap();
        assert!(xdecrypt(&key, &nonce, &ciphertext, b"wrong aad").is_err());
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = [3u8; 32];
        let nonce = [9u8; 24];

        assert!(xdecrypt(&key, &nonce, &[0u8; 8], b"").is_err());
    }
}
