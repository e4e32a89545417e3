//! Key-context factory layer.
//!
//! A [`DataChannelContext`] binds one resolved algorithm pair and
//! manufactures [`DataChannel`] instances for successive key generations.
//! Contexts are cheap and immutable; everything mutable lives in the
//! instances.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use burrow_common::stats::{NullStats, TunnelStats};

use crate::algs::{AlgorithmDescriptor, Cipher, Digest};
use crate::error::CryptoError;
use crate::instance::DataChannel;

/// Algorithm and key-size summary echoed to diagnostics and negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoInfo {
    pub cipher: Cipher,
    pub digest: Digest,
    pub cipher_key_len: usize,
    pub hmac_key_len: usize,
}

/// Factory for data-channel instances sharing one algorithm choice.
pub struct DataChannelContext {
    desc: AlgorithmDescriptor,
    stats: Arc<dyn TunnelStats>,
}

impl DataChannelContext {
    /// Validate the negotiated algorithm pair and build a context.
    ///
    /// Fails with [`CryptoError::UnsupportedCombination`] at negotiation
    /// time; never during steady-state traffic.
    pub fn resolve(cipher: Cipher, digest: Digest) -> Result<Self, CryptoError> {
        Self::with_stats(cipher, digest, Arc::new(NullStats))
    }

    /// Like [`resolve`](Self::resolve), with a default stats sink handed to
    /// every instance. `init_pid` may still override it per instance.
    pub fn with_stats(
        cipher: Cipher,
        digest: Digest,
        stats: Arc<dyn TunnelStats>,
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            desc: AlgorithmDescriptor::resolve(cipher, digest)?,
            stats,
        })
    }

    pub fn descriptor(&self) -> AlgorithmDescriptor {
        self.desc
    }

    /// Build an empty instance for the given key id. Always succeeds
    /// structurally; key material arrives via the instance's own
    /// `init_cipher`/`init_hmac`, policy via `init_pid`.
    pub fn new_instance(&self, key_id: u8) -> DataChannel {
        DataChannel::new(self.desc, key_id, self.stats.clone())
    }

    pub fn crypto_info(&self) -> CryptoInfo {
        CryptoInfo {
            cipher: self.desc.cipher(),
            digest: self.desc.digest(),
            cipher_key_len: self.desc.cipher_key_len(),
            hmac_key_len: self.desc.hmac_key_len(),
        }
    }

    /// Bytes added per packet, for the outer protocol's MTU budgeting.
    pub fn encap_overhead(&self) -> usize {
        self.desc.encap_overhead()
    }
}
