//! Encrypt-then-MAC family packet transforms.
//!
//! # Wire format
//!
//! ```text
//! [8 bytes: packet id] [N bytes: HMAC] [ciphertext]
//! ```
//!
//! The stream-cipher IV is derived from the packet id and key id, not
//! transmitted. The HMAC covers (derived IV ‖ ciphertext), which
//! authenticates the identifier transitively: altering the id changes the
//! derived IV and the MAC no longer verifies. Verification happens before
//! the cipher ever touches the payload.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

use crate::algs::{Cipher, Digest};
use crate::error::CryptoError;
use crate::key::KeyMaterial;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Keyed MAC prototype; cloned per packet so the keyed state is computed
/// once at install time.
#[derive(Debug)]
pub(crate) enum MacKey {
    Sha256(HmacSha256),
    Sha512(HmacSha512),
}

impl MacKey {
    fn new(digest: Digest, key: &KeyMaterial) -> Result<Self, CryptoError> {
        // HMAC itself tolerates any key length; the negotiated contract
        // does not.
        if key.len() != digest.key_len() {
            return Err(CryptoError::KeyLength {
                expected: digest.key_len(),
                got: key.len(),
            });
        }
        let invalid_len = |_| CryptoError::KeyLength {
            expected: digest.key_len(),
            got: key.len(),
        };
        match digest {
            Digest::Sha256 => HmacSha256::new_from_slice(key.as_bytes())
                .map(Self::Sha256)
                .map_err(invalid_len),
            Digest::Sha512 => HmacSha512::new_from_slice(key.as_bytes())
                .map(Self::Sha512)
                .map_err(invalid_len),
            Digest::None => Err(CryptoError::KeyLength {
                expected: 0,
                got: key.len(),
            }),
        }
    }

    fn tag(&self, iv: &[u8], ciphertext: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256(proto) => {
                let mut mac = proto.clone();
                mac.update(iv);
                mac.update(ciphertext);
                mac.finalize().into_bytes().to_vec()
            }
            Self::Sha512(proto) => {
                let mut mac = proto.clone();
                mac.update(iv);
                mac.update(ciphertext);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    /// Constant-time verification.
    fn verify(&self, iv: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
        match self {
            Self::Sha256(proto) => {
                let mut mac = proto.clone();
                mac.update(iv);
                mac.update(ciphertext);
                mac.verify_slice(tag).map_err(|_| CryptoError::AuthFailure)
            }
            Self::Sha512(proto) => {
                let mut mac = proto.clone();
                mac.update(iv);
                mac.update(ciphertext);
                mac.verify_slice(tag).map_err(|_| CryptoError::AuthFailure)
            }
        }
    }
}

/// One direction of the encrypt-then-MAC transform: a stream-cipher key and
/// a keyed MAC.
struct EtmDirection {
    cipher_key: KeyMaterial,
    mac: MacKey,
}

/// Directional encrypt-then-MAC pair for one key generation.
pub(crate) struct EtmTransform {
    send: EtmDirection,
    recv: EtmDirection,
}

impl EtmTransform {
    /// Build from directional material. Cipher keys are moved in and kept
    /// (the stream cipher re-keys per packet with a fresh IV); HMAC keys are
    /// absorbed into the keyed MAC state and dropped by the caller.
    pub fn new(
        cipher: Cipher,
        digest: Digest,
        cipher_encrypt: KeyMaterial,
        cipher_decrypt: KeyMaterial,
        hmac_encrypt: &KeyMaterial,
        hmac_decrypt: &KeyMaterial,
    ) -> Result<Self, CryptoError> {
        for key in [&cipher_encrypt, &cipher_decrypt] {
            if key.len() != cipher.key_len() {
                return Err(CryptoError::KeyLength {
                    expected: cipher.key_len(),
                    got: key.len(),
                });
            }
        }
        Ok(Self {
            send: EtmDirection {
                cipher_key: cipher_encrypt,
                mac: MacKey::new(digest, hmac_encrypt)?,
            },
            recv: EtmDirection {
                cipher_key: cipher_decrypt,
                mac: MacKey::new(digest, hmac_decrypt)?,
            },
        })
    }

    /// Encrypt `body` in place; returns the HMAC over (IV ‖ ciphertext).
    pub fn seal(&self, iv: &[u8; 12], body: &mut [u8]) -> Vec<u8> {
        apply_keystream(&self.send.cipher_key, iv, body);
        self.send.mac.tag(iv, body)
    }

    /// Verify the HMAC over (IV ‖ ciphertext) without touching the payload.
    pub fn verify(&self, iv: &[u8; 12], body: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
        self.recv.mac.verify(iv, body, tag)
    }

    /// Decrypt `body` in place. Only call after [`verify`] succeeded.
    ///
    /// [`verify`]: Self::verify
    pub fn open(&self, iv: &[u8; 12], body: &mut [u8]) {
        apply_keystream(&self.recv.cipher_key, iv, body);
    }
}

fn apply_keystream(key: &KeyMaterial, iv: &[u8; 12], body: &mut [u8]) {
    let mut cipher = ChaCha20::new(
        chacha20::Key::from_slice(key.as_bytes()),
        chacha20::Nonce::from_slice(iv),
    );
    cipher.apply_keystream(body);
}
