//! Packet identifiers: send-side allocation and receive-side replay defense.
//!
//! Every data packet carries a plaintext identifier. The sender allocates
//! them monotonically; the receiver tracks which ones it has already
//! accepted and rejects duplicates, stale stragglers, and identifiers that
//! violate the configured policy.
//!
//! # Wire forms
//!
//! ```text
//! Seq:         [4 bytes: sequence]
//! TimeSalted:  [4 bytes: time] [4 bytes: sequence]
//! ```
//!
//! Sequence 0 is reserved "unset" and never sent. The time-salted form bumps
//! its time word (monotonically, at least the current clock) whenever the
//! 32-bit sequence wraps, so the (time, sequence) pair stays strictly
//! increasing for the lifetime of a key generation. The bare form cannot do
//! that; it signals exhaustion instead so the session layer rekeys.
//!
//! # Replay window design
//!
//! - Identifiers are ordered by the 64-bit value `(time << 32) | seq`.
//! - The window tracks the highest accepted identifier and a bitmap ring of
//!   the `seq_backtrack` identifiers below it.
//! - Identifiers above the high-water mark advance it; identifiers inside
//!   the window are accepted once; anything below the floor is rejected.
//! - Two-phase use: [`PidReceiver::test`] is read-only and runs before any
//!   cipher work; [`PidReceiver::commit`] records the identifier only after
//!   the packet has authenticated, so forged identifiers cannot poison the
//!   window.
//!
//! # Thread safety
//!
//! Not thread-safe; each direction's state belongs to exactly one packet
//! path.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut};

use burrow_common::stats::{NullStats, TunnelStats};

use crate::error::{CryptoError, ReplayError};

/// Coarse wall-clock seconds carried by time-salted identifiers.
pub type PidTime = u32;

/// Remaining-sequence threshold below which the sender raises the
/// near-wrap advisory.
pub const PID_WRAP_GUARD: u32 = 0xFFFF;

/// Upper bound on the configurable sequence backtrack window.
pub const MAX_SEQ_BACKTRACK: u32 = 65_536;

/// Tolerance for identifiers time-stamped ahead of the local clock.
pub const MAX_TIME_SKEW: u32 = 600;

/// Wire form of a packet identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidForm {
    /// 4-byte sequence number only.
    Seq,
    /// 4-byte time followed by 4-byte sequence number.
    TimeSalted,
}

impl PidForm {
    /// Bytes this form occupies on the wire.
    pub fn wire_len(self) -> usize {
        match self {
            PidForm::Seq => 4,
            PidForm::TimeSalted => 8,
        }
    }
}

/// A packet identifier.
///
/// `time` is zero for the bare sequence form. Ordering is lexicographic on
/// (time, seq), which matches the sender's allocation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid {
    pub time: PidTime,
    pub seq: u32,
}

impl Pid {
    /// Position of this identifier in the generation's total order.
    pub fn order(self) -> u64 {
        (u64::from(self.time) << 32) | u64::from(self.seq)
    }

    /// Derive the 12-byte nonce/IV for this identifier under a key id.
    ///
    /// Unique per (generation, identifier): the sender never reuses a
    /// sequence within a generation, and the key id separates generations.
    pub fn nonce(self, key_id: u8) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..4].copy_from_slice(&self.seq.to_be_bytes());
        out[4..8].copy_from_slice(&self.time.to_be_bytes());
        out[8] = key_id;
        out
    }

    /// Append the wire encoding for `form`.
    pub fn write(self, form: PidForm, buf: &mut impl BufMut) {
        if form == PidForm::TimeSalted {
            buf.put_u32(self.time);
        }
        buf.put_u32(self.seq);
    }

    /// Parse the wire encoding for `form`.
    pub fn read(form: PidForm, buf: &mut impl Buf) -> Result<Self, CryptoError> {
        if buf.remaining() < form.wire_len() {
            return Err(CryptoError::Malformed("truncated packet id"));
        }
        let time = if form == PidForm::TimeSalted {
            buf.get_u32()
        } else {
            0
        };
        let seq = buf.get_u32();
        Ok(Self { time, seq })
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.time == 0 {
            write!(f, "#{}", self.seq)
        } else {
            write!(f, "#{}@{}", self.seq, self.time)
        }
    }
}

/// Send-side identifier allocator for one key generation.
#[derive(Debug)]
pub struct PidSender {
    form: PidForm,
    time: PidTime,
    seq: u32,
}

impl PidSender {
    pub fn new(form: PidForm) -> Self {
        Self { form, time: 0, seq: 0 }
    }

    /// Allocate the next identifier.
    ///
    /// The boolean is the near-wrap advisory: true once fewer than
    /// [`PID_WRAP_GUARD`] sequence values remain, so the session layer can
    /// rekey before the space runs out. For the bare sequence form actual
    /// exhaustion is a hard [`CryptoError::PidExhausted`]; the time-salted
    /// form instead bumps its time word and restarts the sequence at 1.
    pub fn next(&mut self, now: PidTime) -> Result<(Pid, bool), CryptoError> {
        if self.form == PidForm::TimeSalted && self.time == 0 {
            self.time = now.max(1);
        }

        let seq = match self.seq.checked_add(1) {
            Some(seq) => seq,
            None if self.form == PidForm::TimeSalted => {
                self.time = now.max(self.time.saturating_add(1));
                self.seq = 1;
                return Ok((Pid { time: self.time, seq: 1 }, false));
            }
            None => return Err(CryptoError::PidExhausted),
        };

        self.seq = seq;
        let near_wrap = u32::MAX - seq <= PID_WRAP_GUARD;
        Ok((Pid { time: self.time, seq }, near_wrap))
    }
}

/// How the receiver orders incoming identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvMode {
    /// Sliding-window mode for unreliable transports: out-of-order
    /// identifiers within the backtrack window are accepted once.
    Backtrack,
    /// Strict mode for reliable transports: only exactly high-water + 1.
    Sequential,
}

/// Identifier-tracking policy delivered by the control channel.
#[derive(Clone)]
pub struct PidConfig {
    pub send_form: PidForm,
    pub recv_mode: RecvMode,
    pub recv_form: PidForm,
    /// How many identifiers below the high-water mark remain acceptable.
    pub seq_backtrack: u32,
    /// How far a time word may lag the high-water time (time-salted only).
    pub time_backtrack: u32,
    /// Peer label for diagnostics; never interpreted.
    pub peer_label: String,
    /// Unit number for diagnostics when one peer has several channels.
    pub unit: i32,
    /// Counter sink for replay/auth/good packet events.
    pub stats: Arc<dyn TunnelStats>,
}

impl PidConfig {
    /// Default policy with both wire forms pinned to `form`.
    pub fn for_form(form: PidForm) -> Self {
        Self {
            send_form: form,
            recv_form: form,
            ..Self::default()
        }
    }
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            send_form: PidForm::Seq,
            recv_mode: RecvMode::Backtrack,
            recv_form: PidForm::Seq,
            seq_backtrack: 64,
            time_backtrack: 0,
            peer_label: "peer".to_string(),
            unit: 0,
            stats: Arc::new(NullStats),
        }
    }
}

impl fmt::Debug for PidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PidConfig")
            .field("send_form", &self.send_form)
            .field("recv_mode", &self.recv_mode)
            .field("recv_form", &self.recv_form)
            .field("seq_backtrack", &self.seq_backtrack)
            .field("time_backtrack", &self.time_backtrack)
            .field("peer_label", &self.peer_label)
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}

/// Sliding-window replay tracker for one key generation's receive side.
#[derive(Debug)]
pub struct PidReceiver {
    mode: RecvMode,
    form: PidForm,
    backtrack: u64,
    time_backtrack: u32,
    high: Option<Pid>,
    bitmap: Vec<u64>,
}

impl PidReceiver {
    pub fn new(config: &PidConfig) -> Self {
        let backtrack = u64::from(config.seq_backtrack.min(MAX_SEQ_BACKTRACK));
        // The ring covers offsets 0..=backtrack below the high-water mark.
        let words = (backtrack as usize + 1).div_ceil(64);
        Self {
            mode: config.recv_mode,
            form: config.recv_form,
            backtrack,
            time_backtrack: config.time_backtrack,
            high: None,
            bitmap: vec![0; words],
        }
    }

    /// Highest identifier accepted so far.
    pub fn high_water(&self) -> Option<Pid> {
        self.high
    }

    /// Check an identifier against the replay policy without recording it.
    ///
    /// Runs before any cipher work; must be followed by [`commit`] once the
    /// packet authenticates.
    ///
    /// [`commit`]: Self::commit
    pub fn test(&self, pid: Pid, now: PidTime) -> Result<(), ReplayError> {
        if pid.seq == 0 {
            return Err(ReplayError::DuplicateOrTooOld);
        }
        if self.form == PidForm::TimeSalted && pid.time > now.saturating_add(MAX_TIME_SKEW) {
            return Err(ReplayError::TooFarInFuture);
        }

        let Some(high) = self.high else {
            // First packet of the generation.
            return match self.mode {
                RecvMode::Backtrack => Ok(()),
                RecvMode::Sequential if pid.seq == 1 => Ok(()),
                RecvMode::Sequential => Err(ReplayError::TooFarInFuture),
            };
        };

        if self.form == PidForm::TimeSalted
            && pid.time.saturating_add(self.time_backtrack) < high.time
        {
            return Err(ReplayError::DuplicateOrTooOld);
        }

        let order = pid.order();
        let high_order = high.order();

        match self.mode {
            RecvMode::Sequential => {
                if order == high_order + 1 {
                    Ok(())
                } else if order <= high_order {
                    Err(ReplayError::DuplicateOrTooOld)
                } else {
                    Err(ReplayError::TooFarInFuture)
                }
            }
            RecvMode::Backtrack => {
                if order > high_order {
                    return Ok(());
                }
                let diff = high_order - order;
                if diff > self.backtrack {
                    return Err(ReplayError::DuplicateOrTooOld);
                }
                if self.bit(order) {
                    Err(ReplayError::DuplicateOrTooOld)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Record an identifier that [`test`] admitted and whose packet has
    /// fully authenticated.
    ///
    /// [`test`]: Self::test
    pub fn commit(&mut self, pid: Pid) {
        let order = pid.order();
        match self.high {
            None => {
                self.high = Some(pid);
                self.set_bit(order);
            }
            Some(high) if order > high.order() => {
                let high_order = high.order();
                // Slots wrapped past by the advance belong to identifiers a
                // full ring ago; scrub them before reuse.
                if order - high_order >= self.capacity_bits() {
                    self.bitmap.fill(0);
                } else {
                    for stale in high_order + 1..=order {
                        self.clear_bit(stale);
                    }
                }
                self.high = Some(pid);
                self.set_bit(order);
            }
            Some(_) => {
                self.set_bit(order);
            }
        }
    }

    fn capacity_bits(&self) -> u64 {
        self.bitmap.len() as u64 * 64
    }

    fn bit(&self, order: u64) -> bool {
        let idx = order % self.capacity_bits();
        self.bitmap[(idx / 64) as usize] & (1u64 << (idx % 64)) != 0
    }

    fn set_bit(&mut self, order: u64) {
        let idx = order % self.capacity_bits();
        self.bitmap[(idx / 64) as usize] |= 1u64 << (idx % 64);
    }

    fn clear_bit(&mut self, order: u64) {
        let idx = order % self.capacity_bits();
        self.bitmap[(idx / 64) as usize] &= !(1u64 << (idx % 64));
    }
}
