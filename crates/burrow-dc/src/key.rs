//! Key material containers.
//!
//! Leftover key bytes are a confidentiality liability, so material is held
//! in an owned buffer that is zeroed before release. Transfers between key
//! slots are moves; nothing in the engine copies secret bytes.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// One directional secret: cipher key or HMAC key for a single direction.
///
/// Deliberately not `Clone`: a secret has exactly one owner, and rekeying
/// moves it rather than duplicating it.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    /// Wrap raw key bytes delivered by the control channel.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Generate fresh random material of the given length.
    pub fn random(len: usize) -> Self {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secret bytes.
        write!(f, "KeyMaterial({} bytes)", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_contents() {
        let key = KeyMaterial::new(vec![0xAB; 32]);
        let rendered = format!("{key:?}");
        assert_eq!(rendered, "KeyMaterial(32 bytes)");
        assert!(!rendered.contains("AB"));
    }

    #[test]
    fn random_material_differs() {
        let a = KeyMaterial::random(32);
        let b = KeyMaterial::random(32);
        assert_eq!(a.len(), 32);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
