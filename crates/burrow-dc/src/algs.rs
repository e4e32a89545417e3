//! Algorithm registry and binder.
//!
//! The registry is the static metadata table on [`Cipher`] and [`Digest`];
//! [`AlgorithmDescriptor::resolve`] is the binder: a pure function that
//! validates a negotiated pair and fixes every derived size the rest of the
//! engine needs. Resolution happens once at negotiation time; nothing on the
//! packet path consults the registry again.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::pid::PidForm;

/// Authentication tag length for both supported AEAD constructions.
pub const AEAD_TAG_LEN: usize = 16;

/// Data-channel cipher algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cipher {
    /// ChaCha20-Poly1305 AEAD (RFC 8439).
    ChaCha20Poly1305,
    /// AES-256 in Galois/Counter mode.
    Aes256Gcm,
    /// Bare ChaCha20 stream cipher; must be paired with an HMAC digest.
    ChaCha20,
}

impl Cipher {
    /// Cipher key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            Cipher::ChaCha20Poly1305 | Cipher::Aes256Gcm | Cipher::ChaCha20 => 32,
        }
    }

    /// Nonce/IV length in bytes. Derived per packet, never transmitted.
    pub fn nonce_len(self) -> usize {
        match self {
            Cipher::ChaCha20Poly1305 | Cipher::Aes256Gcm | Cipher::ChaCha20 => 12,
        }
    }

    /// Authentication tag length added by the cipher itself.
    pub fn tag_len(self) -> usize {
        match self {
            Cipher::ChaCha20Poly1305 | Cipher::Aes256Gcm => AEAD_TAG_LEN,
            Cipher::ChaCha20 => 0,
        }
    }

    /// Whether the cipher authenticates as well as encrypts.
    pub fn is_aead(self) -> bool {
        match self {
            Cipher::ChaCha20Poly1305 | Cipher::Aes256Gcm => true,
            Cipher::ChaCha20 => false,
        }
    }
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cipher::ChaCha20Poly1305 => "CHACHA20-POLY1305",
            Cipher::Aes256Gcm => "AES-256-GCM",
            Cipher::ChaCha20 => "CHACHA20",
        };
        f.write_str(name)
    }
}

/// HMAC digest algorithms for the encrypt-then-MAC family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Digest {
    /// Sentinel for AEAD ciphers, which need no separate digest.
    None,
    Sha256,
    Sha512,
}

impl Digest {
    /// HMAC output length in bytes (zero for the sentinel).
    pub fn hmac_len(self) -> usize {
        match self {
            Digest::None => 0,
            Digest::Sha256 => 32,
            Digest::Sha512 => 64,
        }
    }

    /// HMAC key length in bytes; by convention the digest output size.
    pub fn key_len(self) -> usize {
        self.hmac_len()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Digest::None => "none",
            Digest::Sha256 => "SHA256",
            Digest::Sha512 => "SHA512",
        };
        f.write_str(name)
    }
}

/// A validated (cipher, digest) pair with every derived size fixed.
///
/// Immutable once resolved. Carried by the key context and every instance it
/// manufactures, so the packet path never re-validates algorithm choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmDescriptor {
    cipher: Cipher,
    digest: Digest,
}

impl AlgorithmDescriptor {
    /// Validate a negotiated algorithm pair.
    ///
    /// Accepts an AEAD cipher with the `none` digest, or a non-AEAD cipher
    /// with a real HMAC digest. Everything else is rejected at negotiation
    /// time, never during steady-state traffic.
    pub fn resolve(cipher: Cipher, digest: Digest) -> Result<Self, CryptoError> {
        let valid = if cipher.is_aead() {
            digest == Digest::None
        } else {
            digest != Digest::None
        };

        if !valid {
            return Err(CryptoError::UnsupportedCombination { cipher, digest });
        }

        Ok(Self { cipher, digest })
    }

    pub fn cipher(&self) -> Cipher {
        self.cipher
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }

    pub fn cipher_key_len(&self) -> usize {
        self.cipher.key_len()
    }

    pub fn hmac_key_len(&self) -> usize {
        self.digest.key_len()
    }

    /// Packet-identifier wire form for this family.
    ///
    /// AEAD packets carry the bare 4-byte sequence (the nonce derivation
    /// absorbs it); encrypt-then-MAC packets carry the time-salted 8-byte
    /// form so the sequence space survives wrap by bumping the time word.
    pub fn pid_form(&self) -> PidForm {
        if self.cipher.is_aead() {
            PidForm::Seq
        } else {
            PidForm::TimeSalted
        }
    }

    /// Bytes added to every packet: identifier field plus authentication
    /// material. Must exactly match what `encrypt` adds; the outer protocol
    /// budgets MTU from this.
    pub fn encap_overhead(&self) -> usize {
        let auth = if self.cipher.is_aead() {
            self.cipher.tag_len()
        } else {
            self.digest.hmac_len()
        };
        self.pid_form().wire_len() + auth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aead_pairs_resolve() {
        for cipher in [Cipher::ChaCha20Poly1305, Cipher::Aes256Gcm] {
            let desc = AlgorithmDescriptor::resolve(cipher, Digest::None).unwrap();
            assert_eq!(desc.cipher_key_len(), 32);
            assert_eq!(desc.hmac_key_len(), 0);
            assert_eq!(desc.pid_form(), PidForm::Seq);
            assert_eq!(desc.encap_overhead(), 4 + 16);
        }
    }

    #[test]
    fn etm_pairs_resolve() {
        let desc = AlgorithmDescriptor::resolve(Cipher::ChaCha20, Digest::Sha256).unwrap();
        assert_eq!(desc.hmac_key_len(), 32);
        assert_eq!(desc.pid_form(), PidForm::TimeSalted);
        assert_eq!(desc.encap_overhead(), 8 + 32);

        let desc = AlgorithmDescriptor::resolve(Cipher::ChaCha20, Digest::Sha512).unwrap();
        assert_eq!(desc.encap_overhead(), 8 + 64);
    }

    #[test]
    fn invalid_pairs_rejected() {
        for (cipher, digest) in [
            (Cipher::ChaCha20Poly1305, Digest::Sha256),
            (Cipher::Aes256Gcm, Digest::Sha512),
            (Cipher::ChaCha20, Digest::None),
        ] {
            let err = AlgorithmDescriptor::resolve(cipher, digest).unwrap_err();
            assert!(matches!(err, CryptoError::UnsupportedCombination { .. }));
        }
    }

    #[test]
    fn display_names() {
        assert_eq!(Cipher::Aes256Gcm.to_string(), "AES-256-GCM");
        assert_eq!(Digest::None.to_string(), "none");
        assert_eq!(Digest::Sha512.to_string(), "SHA512");
    }
}
