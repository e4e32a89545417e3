//! AEAD family packet transforms.
//!
//! # Wire format
//!
//! ```text
//! [4 bytes: packet id] [16 bytes: auth tag] [ciphertext]
//! ```
//!
//! The 12-byte nonce is derived from (sequence, time, key id) and never
//! transmitted; the packet-id field supplies its unique part and is bound
//! into the tag as associated data, so a forged or reshuffled identifier
//! fails authentication before anything else happens.

use aes_gcm::Aes256Gcm;
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;

use crate::algs::{Cipher, Digest, AEAD_TAG_LEN};
use crate::error::CryptoError;
use crate::key::KeyMaterial;

/// One direction's AEAD state.
pub(crate) enum AeadCipher {
    ChaCha(Box<ChaCha20Poly1305>),
    AesGcm(Box<Aes256Gcm>),
}

impl AeadCipher {
    fn new(cipher: Cipher, key: &KeyMaterial) -> Result<Self, CryptoError> {
        let invalid_len = |_| CryptoError::KeyLength {
            expected: cipher.key_len(),
            got: key.len(),
        };
        match cipher {
            Cipher::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map(|c| Self::ChaCha(Box::new(c)))
                .map_err(invalid_len),
            Cipher::Aes256Gcm => Aes256Gcm::new_from_slice(key.as_bytes())
                .map(|c| Self::AesGcm(Box::new(c)))
                .map_err(invalid_len),
            Cipher::ChaCha20 => Err(CryptoError::UnsupportedCombination {
                cipher,
                digest: Digest::None,
            }),
        }
    }

    fn seal(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        body: &mut [u8],
    ) -> Result<[u8; AEAD_TAG_LEN], CryptoError> {
        match self {
            Self::ChaCha(c) => c
                .encrypt_in_place_detached(chacha20poly1305::Nonce::from_slice(nonce), aad, body)
                .map(Into::into)
                .map_err(|_| CryptoError::Malformed("oversized payload")),
            Self::AesGcm(c) => c
                .encrypt_in_place_detached(aes_gcm::Nonce::from_slice(nonce), aad, body)
                .map(Into::into)
                .map_err(|_| CryptoError::Malformed("oversized payload")),
        }
    }

    fn open(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        body: &mut [u8],
        tag: &[u8],
    ) -> Result<(), CryptoError> {
        match self {
            Self::ChaCha(c) => c
                .decrypt_in_place_detached(
                    chacha20poly1305::Nonce::from_slice(nonce),
                    aad,
                    body,
                    chacha20poly1305::Tag::from_slice(tag),
                )
                .map_err(|_| CryptoError::AuthFailure),
            Self::AesGcm(c) => c
                .decrypt_in_place_detached(
                    aes_gcm::Nonce::from_slice(nonce),
                    aad,
                    body,
                    aes_gcm::Tag::from_slice(tag),
                )
                .map_err(|_| CryptoError::AuthFailure),
        }
    }
}

/// Directional AEAD pair for one key generation.
pub(crate) struct AeadTransform {
    send: AeadCipher,
    recv: AeadCipher,
}

impl AeadTransform {
    /// Build from directional key material. The material is absorbed into
    /// cipher state; the caller drops (and thereby zeroizes) the buffers.
    pub fn new(
        cipher: Cipher,
        encrypt_key: &KeyMaterial,
        decrypt_key: &KeyMaterial,
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            send: AeadCipher::new(cipher, encrypt_key)?,
            recv: AeadCipher::new(cipher, decrypt_key)?,
        })
    }

    /// Encrypt `body` in place; returns the detached tag.
    pub fn seal(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        body: &mut [u8],
    ) -> Result<[u8; AEAD_TAG_LEN], CryptoError> {
        self.send.seal(nonce, aad, body)
    }

    /// Verify and decrypt `body` in place. Tag mismatch leaves nothing
    /// usable behind and reports [`CryptoError::AuthFailure`].
    pub fn open(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        body: &mut [u8],
        tag: &[u8],
    ) -> Result<(), CryptoError> {
        self.recv.open(nonce, aad, body, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pid::Pid;

    fn transform(cipher: Cipher) -> AeadTransform {
        let key = KeyMaterial::new(vec![0x42; 32]);
        AeadTransform::new(cipher, &key, &key).unwrap()
    }

    #[test]
    fn seal_open_roundtrip() {
        for cipher in [Cipher::ChaCha20Poly1305, Cipher::Aes256Gcm] {
            let t = transform(cipher);
            let nonce = Pid { time: 0, seq: 1 }.nonce(0);
            let aad = 1u32.to_be_bytes();

            let mut body = b"tunneled payload".to_vec();
            let tag = t.seal(&nonce, &aad, &mut body).unwrap();
            assert_ne!(&body, b"tunneled payload");

            t.open(&nonce, &aad, &mut body, &tag).unwrap();
            assert_eq!(&body, b"tunneled payload");
        }
    }

    #[test]
    fn tampered_aad_fails() {
        let t = transform(Cipher::ChaCha20Poly1305);
        let nonce = Pid { time: 0, seq: 1 }.nonce(0);

        let mut body = b"payload".to_vec();
        let tag = t.seal(&nonce, &1u32.to_be_bytes(), &mut body).unwrap();

        let err = t
            .open(&nonce, &2u32.to_be_bytes(), &mut body, &tag)
            .unwrap_err();
        assert_eq!(err, CryptoError::AuthFailure);
    }

    #[test]
    fn stream_cipher_is_not_aead() {
        let key = KeyMaterial::new(vec![0; 32]);
        assert!(AeadCipher::new(Cipher::ChaCha20, &key).is_err());
    }
}
