//! Data-channel crypto engine for Burrow.
//!
//! Every tunneled payload packet passes through this crate: authenticated
//! encryption on the way out, authenticate-then-decrypt with replay defense
//! on the way in, and live key-generation transitions without dropping the
//! tunnel.
//!
//! # Layering
//!
//! ```text
//! resolve(cipher, digest)          algorithm binder (pure)
//!         |
//!         v
//! DataChannelContext               one per negotiated algorithm pair
//!         |  new_instance(key_id)
//!         v
//! DataChannel                      hot path: encrypt / decrypt / rekey
//! ```
//!
//! Two cipher families sit behind the one instance contract:
//!
//! - **AEAD** (ChaCha20-Poly1305, AES-256-GCM): tag check and decryption are
//!   a single transform; packets carry `[pid][tag][ciphertext]`.
//! - **Encrypt-then-MAC** (ChaCha20 + HMAC-SHA-256/512): the HMAC is
//!   verified before the cipher touches anything; packets carry
//!   `[pid][hmac][ciphertext]`.
//!
//! Nonces and IVs are derived from the packet identifier and key id, never
//! transmitted; identifier reuse within a key generation is structurally
//! impossible (sequence exhaustion forces a rekey instead of wrapping).
//!
//! All operations are synchronous, bounded-time, and CPU-only; per-packet
//! failures are values, not faults — a forged or replayed packet is counted
//! and dropped, and the tunnel keeps running.

#![forbid(unsafe_code)]

pub mod algs;
pub mod context;
pub mod error;
pub mod instance;
pub mod key;
pub mod pid;

mod aead;
mod etm;

pub use algs::{AlgorithmDescriptor, Cipher, Digest};
pub use context::{CryptoInfo, DataChannelContext};
pub use error::{CryptoError, ReplayError};
pub use instance::{DataChannel, Defined, Rekey, RekeyState};
pub use key::KeyMaterial;
pub use pid::{Pid, PidConfig, PidForm, PidReceiver, PidSender, RecvMode};
