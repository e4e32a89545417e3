//! Data-channel error taxonomy.
//!
//! Per-packet failures ([`CryptoError::AuthFailure`], [`CryptoError::Replay`])
//! are local: the packet is dropped and counted, the tunnel survives. Only
//! setup-time failures (unsupported algorithm pairs, missing key material)
//! are surfaced to the control layer as hard errors.

use thiserror::Error;

use crate::algs::{Cipher, Digest};
use crate::instance::RekeyState;
use crate::pid::PidForm;

/// Why replay protection rejected an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReplayError {
    /// Already seen, below the window floor, or lagging the time backtrack.
    #[error("duplicate or too old")]
    DuplicateOrTooOld,

    /// Ahead of what the policy allows: a gap in sequential mode, or a
    /// timestamp beyond the local clock's skew tolerance.
    #[error("too far in the future")]
    TooFarInFuture,
}

/// Errors produced by the data-channel engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Required key material or identifier policy has not been installed.
    #[error("data channel not initialized")]
    NotInitialized,

    /// The negotiated cipher/digest pairing is not a supported combination.
    #[error("unsupported combination: {cipher}/{digest}")]
    UnsupportedCombination { cipher: Cipher, digest: Digest },

    /// Installed key material does not match the algorithm's declared length.
    #[error("bad key length: expected {expected} bytes, got {got}")]
    KeyLength { expected: usize, got: usize },

    /// The identifier policy's wire form contradicts the algorithm family.
    #[error("packet id form mismatch: algorithm requires {expected:?}")]
    PidFormMismatch { expected: PidForm },

    /// Authentication tag or HMAC mismatch. Dropped silently at the wire
    /// boundary; counted, never logged with payload bytes.
    #[error("packet authentication failed")]
    AuthFailure,

    /// Replay protection rejected the packet identifier.
    #[error("replay rejected: {0}")]
    Replay(#[from] ReplayError),

    /// The packet's key id matches no live key generation.
    #[error("no active key generation with id {0}")]
    UnknownKeyId(u8),

    /// The send-side identifier space is exhausted; the session layer must
    /// rekey before any further packet can be sent.
    #[error("packet id space exhausted; rekey required")]
    PidExhausted,

    /// Packet too short to carry the declared header fields.
    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    /// The rekey command is not valid in the current lifecycle state.
    #[error("invalid rekey command in state {0:?}")]
    InvalidRekey(RekeyState),

    /// The instance was torn down by `DeactivateAll` and is unusable.
    #[error("data channel retired")]
    Retired,
}
