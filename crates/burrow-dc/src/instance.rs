//! The data-channel hot path: per-packet transforms and key-slot state.
//!
//! A [`DataChannel`] owns the key material, packet-identifier state, and
//! transforms for up to two live key generations, plus a staging area the
//! control channel fills before each activation.
//!
//! # Lifecycle
//!
//! ```text
//!             init_cipher / init_hmac / init_pid
//!                          |
//!                          v
//!  Empty ---ActivatePrimary---> PrimaryActive <--------------------+
//!                                    |                             |
//!                         ActivateSecondary          DeactivateSecondary /
//!                                    |             PromoteSecondaryToPrimary
//!                                    v                             |
//!                               DualActive ------------------------+
//!
//!  any state ---DeactivateAll---> Retired (terminal, keys erased)
//! ```
//!
//! Sending always uses the primary generation. Receiving selects the
//! generation by the packet-carried key id, so a dual-active overlap never
//! needs trial decryption. Promotion moves the secondary slot into primary;
//! the retired generation's material is zeroized as it drops.
//!
//! # Thread safety
//!
//! No internal locking. One instance belongs to one packet path; if encrypt
//! and decrypt run on different threads the caller must guarantee each
//! direction's state is touched by only one of them, and must serialize
//! rekey against both.

use std::sync::Arc;

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use tracing::{debug, warn};

use burrow_common::stats::TunnelStats;

use crate::aead::AeadTransform;
use crate::algs::AlgorithmDescriptor;
use crate::error::CryptoError;
use crate::etm::EtmTransform;
use crate::key::KeyMaterial;
use crate::pid::{Pid, PidConfig, PidReceiver, PidSender, PidTime, MAX_SEQ_BACKTRACK};

bitflags! {
    /// Which key material has been installed into the staged slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Defined: u8 {
        const CIPHER_DEFINED = 1 << 0;
        const HMAC_DEFINED = 1 << 1;
    }
}

/// Key-generation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyState {
    /// No active key material.
    Empty,
    /// One generation live.
    PrimaryActive,
    /// Two generations live while the old one drains in-flight traffic.
    DualActive,
    /// Torn down; all material erased. Terminal.
    Retired,
}

/// Rekey commands issued by the session layer as negotiation milestones
/// complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rekey {
    /// Promote the staged material to the (sole) primary generation.
    ActivatePrimary,
    /// Bring the staged material up as the secondary generation.
    ActivateSecondary,
    /// Discard the secondary generation without promoting it.
    DeactivateSecondary,
    /// The secondary generation becomes primary; the old primary is erased.
    PromoteSecondaryToPrimary,
    /// Erase everything and retire the instance.
    DeactivateAll,
}

/// Directional key material accumulating in the staging area.
#[derive(Debug)]
struct StagedKeys {
    key_id: u8,
    defined: Defined,
    cipher_encrypt: Option<KeyMaterial>,
    cipher_decrypt: Option<KeyMaterial>,
    hmac_encrypt: Option<KeyMaterial>,
    hmac_decrypt: Option<KeyMaterial>,
}

impl StagedKeys {
    fn new(key_id: u8) -> Self {
        Self {
            key_id,
            defined: Defined::empty(),
            cipher_encrypt: None,
            cipher_decrypt: None,
            hmac_encrypt: None,
            hmac_decrypt: None,
        }
    }

    fn clear(&mut self) {
        // Dropping the options zeroizes the material.
        self.defined = Defined::empty();
        self.cipher_encrypt = None;
        self.cipher_decrypt = None;
        self.hmac_encrypt = None;
        self.hmac_decrypt = None;
    }
}

enum Transform {
    Aead(AeadTransform),
    Etm(EtmTransform),
}

/// One live key generation: transforms plus per-direction identifier state.
struct KeySlot {
    key_id: u8,
    transform: Transform,
    sender: PidSender,
    receiver: PidReceiver,
}

/// Hot-path crypto instance for one tunnel.
///
/// Created [`RekeyState::Empty`] by a context; the control channel installs
/// key material and identifier policy, then drives the rekey lifecycle.
pub struct DataChannel {
    desc: AlgorithmDescriptor,
    state: RekeyState,
    staged: StagedKeys,
    primary: Option<KeySlot>,
    secondary: Option<KeySlot>,
    pid_config: Option<PidConfig>,
    peer_label: String,
    unit: i32,
    stats: Arc<dyn TunnelStats>,
}

impl DataChannel {
    pub(crate) fn new(desc: AlgorithmDescriptor, key_id: u8, stats: Arc<dyn TunnelStats>) -> Self {
        Self {
            desc,
            state: RekeyState::Empty,
            staged: StagedKeys::new(key_id),
            primary: None,
            secondary: None,
            pid_config: None,
            peer_label: "peer".to_string(),
            unit: 0,
            stats,
        }
    }

    pub fn state(&self) -> RekeyState {
        self.state
    }

    /// Capability flags of the staging area.
    pub fn defined(&self) -> Defined {
        self.staged.defined
    }

    /// Key id of the generation `encrypt` currently uses, if any.
    pub fn send_key_id(&self) -> Option<u8> {
        self.primary.as_ref().map(|slot| slot.key_id)
    }

    /// Key id the next activation will bring up.
    pub fn staged_key_id(&self) -> u8 {
        self.staged.key_id
    }

    /// Bytes `encrypt` adds to every packet.
    pub fn encap_overhead(&self) -> usize {
        self.desc.encap_overhead()
    }

    /// Install directional cipher key material into the staging area.
    ///
    /// The material is moved in; a repeated call replaces (and erases) the
    /// previous staging material.
    pub fn init_cipher(
        &mut self,
        encrypt: KeyMaterial,
        decrypt: KeyMaterial,
    ) -> Result<(), CryptoError> {
        self.ensure_live()?;
        let expected = self.desc.cipher_key_len();
        for key in [&encrypt, &decrypt] {
            if key.len() != expected {
                return Err(CryptoError::KeyLength { expected, got: key.len() });
            }
        }
        self.staged.cipher_encrypt = Some(encrypt);
        self.staged.cipher_decrypt = Some(decrypt);
        self.staged.defined |= Defined::CIPHER_DEFINED;
        Ok(())
    }

    /// Install directional HMAC key material into the staging area.
    ///
    /// Only meaningful for the encrypt-then-MAC family; the AEAD family
    /// declares an HMAC key length of zero and rejects any material.
    pub fn init_hmac(
        &mut self,
        encrypt: KeyMaterial,
        decrypt: KeyMaterial,
    ) -> Result<(), CryptoError> {
        self.ensure_live()?;
        let expected = self.desc.hmac_key_len();
        for key in [&encrypt, &decrypt] {
            if key.len() != expected || expected == 0 {
                return Err(CryptoError::KeyLength { expected, got: key.len() });
            }
        }
        self.staged.hmac_encrypt = Some(encrypt);
        self.staged.hmac_decrypt = Some(decrypt);
        self.staged.defined |= Defined::HMAC_DEFINED;
        Ok(())
    }

    /// Install the identifier-tracking policy.
    ///
    /// Applies to every generation activated afterwards. The wire forms
    /// must match the algorithm family so that `encap_overhead` stays
    /// exact.
    pub fn init_pid(&mut self, config: PidConfig) -> Result<(), CryptoError> {
        self.ensure_live()?;
        let expected = self.desc.pid_form();
        if config.send_form != expected || config.recv_form != expected {
            return Err(CryptoError::PidFormMismatch { expected });
        }
        if config.seq_backtrack > MAX_SEQ_BACKTRACK {
            warn!(
                requested = config.seq_backtrack,
                max = MAX_SEQ_BACKTRACK,
                "sequence backtrack clamped"
            );
        }
        self.peer_label = config.peer_label.clone();
        self.unit = config.unit;
        self.stats = config.stats.clone();
        self.pid_config = Some(config);
        Ok(())
    }

    /// Drive a key-generation transition.
    pub fn rekey(&mut self, op: Rekey) -> Result<(), CryptoError> {
        if self.state == RekeyState::Retired {
            return Err(CryptoError::Retired);
        }
        match (self.state, op) {
            (RekeyState::Empty, Rekey::ActivatePrimary) => {
                self.primary = Some(self.activate_staged()?);
                self.state = RekeyState::PrimaryActive;
            }
            (RekeyState::PrimaryActive, Rekey::ActivateSecondary) => {
                self.secondary = Some(self.activate_staged()?);
                self.state = RekeyState::DualActive;
            }
            (RekeyState::DualActive, Rekey::PromoteSecondaryToPrimary) => {
                let promoted = self
                    .secondary
                    .take()
                    .ok_or(CryptoError::InvalidRekey(self.state))?;
                // Moving the slot out drops the old primary, erasing its keys.
                self.primary = Some(promoted);
                self.state = RekeyState::PrimaryActive;
            }
            (RekeyState::DualActive, Rekey::DeactivateSecondary) => {
                self.secondary = None;
                self.state = RekeyState::PrimaryActive;
            }
            (_, Rekey::DeactivateAll) => {
                self.primary = None;
                self.secondary = None;
                self.staged.clear();
                self.pid_config = None;
                self.state = RekeyState::Retired;
            }
            (state, _) => return Err(CryptoError::InvalidRekey(state)),
        }
        debug!(?op, state = ?self.state, "rekey");
        Ok(())
    }

    /// Encrypt a payload in place under the primary generation.
    ///
    /// On success the buffer holds the full wire packet and the returned
    /// boolean is the near-wrap advisory from the identifier allocator: the
    /// session layer should schedule a rekey once it turns true.
    pub fn encrypt(&mut self, buf: &mut BytesMut, now: PidTime) -> Result<bool, CryptoError> {
        let desc = self.desc;
        let slot = match self.state {
            RekeyState::Retired => return Err(CryptoError::Retired),
            RekeyState::Empty => return Err(CryptoError::NotInitialized),
            RekeyState::PrimaryActive | RekeyState::DualActive => {
                self.primary.as_mut().ok_or(CryptoError::NotInitialized)?
            }
        };

        let (pid, near_wrap) = slot.sender.next(now)?;

        let form = desc.pid_form();
        let plen = form.wire_len();
        let mut pid_bytes = [0u8; 8];
        {
            let mut writer = &mut pid_bytes[..plen];
            pid.write(form, &mut writer);
        }
        let nonce = pid.nonce(slot.key_id);

        let mut body = buf.split();
        match &slot.transform {
            Transform::Aead(t) => {
                let tag = t.seal(&nonce, &pid_bytes[..plen], &mut body)?;
                buf.reserve(plen + tag.len() + body.len());
                buf.put_slice(&pid_bytes[..plen]);
                buf.put_slice(&tag);
                buf.put_slice(&body);
            }
            Transform::Etm(t) => {
                let tag = t.seal(&nonce, &mut body);
                buf.reserve(plen + tag.len() + body.len());
                buf.put_slice(&pid_bytes[..plen]);
                buf.put_slice(&tag);
                buf.put_slice(&body);
            }
        }

        Ok(near_wrap)
    }

    /// Authenticate, replay-check, and decrypt a wire packet in place.
    ///
    /// `key_id` is the packet-carried generation tag parsed by the session
    /// layer from its outer header; it selects the primary or, during
    /// dual-active overlap, the secondary generation. On success the buffer
    /// holds the plaintext payload only. On any error the packet must be
    /// dropped and the buffer contents are unspecified.
    pub fn decrypt(
        &mut self,
        buf: &mut BytesMut,
        now: PidTime,
        key_id: u8,
    ) -> Result<(), CryptoError> {
        let wire_len = buf.len();
        let result = self.decrypt_inner(buf, now, key_id);
        match &result {
            Ok(()) => self.stats.good_packet(buf.len()),
            Err(CryptoError::Replay(reason)) => {
                self.stats.replay_rejected(wire_len);
                debug!(
                    peer = %self.peer_label,
                    unit = self.unit,
                    %reason,
                    "replay rejected"
                );
            }
            Err(
                err @ (CryptoError::AuthFailure
                | CryptoError::Malformed(_)
                | CryptoError::UnknownKeyId(_)),
            ) => {
                self.stats.auth_failed(wire_len);
                debug!(
                    peer = %self.peer_label,
                    unit = self.unit,
                    %err,
                    "packet dropped"
                );
            }
            Err(_) => {}
        }
        result
    }

    fn decrypt_inner(
        &mut self,
        buf: &mut BytesMut,
        now: PidTime,
        key_id: u8,
    ) -> Result<(), CryptoError> {
        let desc = self.desc;
        match self.state {
            RekeyState::Retired => return Err(CryptoError::Retired),
            RekeyState::Empty => return Err(CryptoError::NotInitialized),
            RekeyState::PrimaryActive | RekeyState::DualActive => {}
        }

        let slot = if self.primary.as_ref().is_some_and(|s| s.key_id == key_id) {
            self.primary.as_mut().ok_or(CryptoError::NotInitialized)?
        } else if self.state == RekeyState::DualActive
            && self.secondary.as_ref().is_some_and(|s| s.key_id == key_id)
        {
            self.secondary.as_mut().ok_or(CryptoError::NotInitialized)?
        } else {
            return Err(CryptoError::UnknownKeyId(key_id));
        };

        let form = desc.pid_form();
        let plen = form.wire_len();
        let overhead = desc.encap_overhead();
        if buf.len() < overhead {
            return Err(CryptoError::Malformed("short packet"));
        }

        let mut reader = &buf[..];
        let pid = Pid::read(form, &mut reader)?;
        let nonce = pid.nonce(key_id);

        match &slot.transform {
            Transform::Aead(t) => {
                // Peek the window before the transform; record only after
                // the tag verifies so forged ids cannot advance it.
                slot.receiver.test(pid, now)?;
                let mut body = buf.split_off(overhead);
                let header = &buf[..];
                t.open(&nonce, &header[..plen], &mut body, &header[plen..])?;
                slot.receiver.commit(pid);
                let _ = std::mem::replace(buf, body);
            }
            Transform::Etm(t) => {
                // Authenticate before the cipher touches anything, then
                // freshness, then decrypt.
                let mut body = buf.split_off(overhead);
                t.verify(&nonce, &body, &buf[plen..])?;
                slot.receiver.test(pid, now)?;
                t.open(&nonce, &mut body);
                slot.receiver.commit(pid);
                let _ = std::mem::replace(buf, body);
            }
        }

        Ok(())
    }

    fn ensure_live(&self) -> Result<(), CryptoError> {
        if self.state == RekeyState::Retired {
            Err(CryptoError::Retired)
        } else {
            Ok(())
        }
    }

    /// Turn the staging area into a live key slot.
    fn activate_staged(&mut self) -> Result<KeySlot, CryptoError> {
        let needed = if self.desc.cipher().is_aead() {
            Defined::CIPHER_DEFINED
        } else {
            Defined::CIPHER_DEFINED | Defined::HMAC_DEFINED
        };
        if !self.staged.defined.contains(needed) {
            return Err(CryptoError::NotInitialized);
        }

        let key_id = self.staged.key_id;
        let cipher_encrypt = self
            .staged
            .cipher_encrypt
            .take()
            .ok_or(CryptoError::NotInitialized)?;
        let cipher_decrypt = self
            .staged
            .cipher_decrypt
            .take()
            .ok_or(CryptoError::NotInitialized)?;

        let transform = if self.desc.cipher().is_aead() {
            // Key bytes are absorbed into cipher state; the buffers zeroize
            // as they drop here.
            Transform::Aead(AeadTransform::new(
                self.desc.cipher(),
                &cipher_encrypt,
                &cipher_decrypt,
            )?)
        } else {
            let hmac_encrypt = self
                .staged
                .hmac_encrypt
                .take()
                .ok_or(CryptoError::NotInitialized)?;
            let hmac_decrypt = self
                .staged
                .hmac_decrypt
                .take()
                .ok_or(CryptoError::NotInitialized)?;
            Transform::Etm(EtmTransform::new(
                self.desc.cipher(),
                self.desc.digest(),
                cipher_encrypt,
                cipher_decrypt,
                &hmac_encrypt,
                &hmac_decrypt,
            )?)
        };

        let form = self.desc.pid_form();
        let config = self
            .pid_config
            .clone()
            .unwrap_or_else(|| PidConfig::for_form(form));

        let slot = KeySlot {
            key_id,
            transform,
            sender: PidSender::new(form),
            receiver: PidReceiver::new(&config),
        };

        self.staged = StagedKeys::new(next_key_id(key_id));
        Ok(slot)
    }
}

/// 3-bit key-id progression: increments modulo 8 and skips 0 on wrap, so a
/// live generation and its successor never share an id.
fn next_key_id(id: u8) -> u8 {
    let next = (id + 1) & 0x07;
    if next == 0 {
        1
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::{Cipher, Digest};
    use crate::context::DataChannelContext;

    fn aead_channel() -> DataChannel {
        DataChannelContext::resolve(Cipher::ChaCha20Poly1305, Digest::None)
            .unwrap()
            .new_instance(0)
    }

    fn install_cipher(chan: &mut DataChannel) {
        let len = 32;
        chan.init_cipher(KeyMaterial::new(vec![1; len]), KeyMaterial::new(vec![2; len]))
            .unwrap();
    }

    #[test]
    fn fresh_instance_is_empty() {
        let mut chan = aead_channel();
        assert_eq!(chan.state(), RekeyState::Empty);
        assert_eq!(chan.defined(), Defined::empty());
        assert_eq!(chan.send_key_id(), None);

        let mut buf = BytesMut::from(&b"payload"[..]);
        assert_eq!(chan.encrypt(&mut buf, 0), Err(CryptoError::NotInitialized));
        assert_eq!(
            chan.decrypt(&mut buf, 0, 0),
            Err(CryptoError::NotInitialized)
        );
    }

    #[test]
    fn activation_requires_material() {
        let mut chan = aead_channel();
        assert_eq!(
            chan.rekey(Rekey::ActivatePrimary),
            Err(CryptoError::NotInitialized)
        );

        install_cipher(&mut chan);
        assert_eq!(chan.defined(), Defined::CIPHER_DEFINED);
        chan.rekey(Rekey::ActivatePrimary).unwrap();
        assert_eq!(chan.state(), RekeyState::PrimaryActive);
        assert_eq!(chan.send_key_id(), Some(0));
        assert_eq!(chan.staged_key_id(), 1);
    }

    #[test]
    fn etm_activation_requires_hmac() {
        let mut chan = DataChannelContext::resolve(Cipher::ChaCha20, Digest::Sha256)
            .unwrap()
            .new_instance(0);
        install_cipher(&mut chan);
        assert_eq!(
            chan.rekey(Rekey::ActivatePrimary),
            Err(CryptoError::NotInitialized)
        );

        chan.init_hmac(KeyMaterial::new(vec![3; 32]), KeyMaterial::new(vec![4; 32]))
            .unwrap();
        assert_eq!(
            chan.defined(),
            Defined::CIPHER_DEFINED | Defined::HMAC_DEFINED
        );
        chan.rekey(Rekey::ActivatePrimary).unwrap();
    }

    #[test]
    fn aead_rejects_hmac_material() {
        let mut chan = aead_channel();
        let err = chan
            .init_hmac(KeyMaterial::new(vec![0; 32]), KeyMaterial::new(vec![0; 32]))
            .unwrap_err();
        assert_eq!(err, CryptoError::KeyLength { expected: 0, got: 32 });
    }

    #[test]
    fn wrong_cipher_key_length_rejected() {
        let mut chan = aead_channel();
        let err = chan
            .init_cipher(KeyMaterial::new(vec![0; 16]), KeyMaterial::new(vec![0; 16]))
            .unwrap_err();
        assert_eq!(err, CryptoError::KeyLength { expected: 32, got: 16 });
    }

    #[test]
    fn invalid_transitions_rejected() {
        let mut chan = aead_channel();
        assert_eq!(
            chan.rekey(Rekey::PromoteSecondaryToPrimary),
            Err(CryptoError::InvalidRekey(RekeyState::Empty))
        );
        assert_eq!(
            chan.rekey(Rekey::ActivateSecondary),
            Err(CryptoError::InvalidRekey(RekeyState::Empty))
        );

        install_cipher(&mut chan);
        chan.rekey(Rekey::ActivatePrimary).unwrap();
        assert_eq!(
            chan.rekey(Rekey::ActivatePrimary),
            Err(CryptoError::InvalidRekey(RekeyState::PrimaryActive))
        );
        assert_eq!(
            chan.rekey(Rekey::DeactivateSecondary),
            Err(CryptoError::InvalidRekey(RekeyState::PrimaryActive))
        );
    }

    #[test]
    fn deactivate_all_is_terminal() {
        let mut chan = aead_channel();
        install_cipher(&mut chan);
        chan.rekey(Rekey::ActivatePrimary).unwrap();
        chan.rekey(Rekey::DeactivateAll).unwrap();
        assert_eq!(chan.state(), RekeyState::Retired);

        let mut buf = BytesMut::from(&b"payload"[..]);
        assert_eq!(chan.encrypt(&mut buf, 0), Err(CryptoError::Retired));
        assert_eq!(chan.decrypt(&mut buf, 0, 0), Err(CryptoError::Retired));
        assert_eq!(chan.rekey(Rekey::ActivatePrimary), Err(CryptoError::Retired));
        assert_eq!(
            chan.init_cipher(KeyMaterial::new(vec![0; 32]), KeyMaterial::new(vec![0; 32])),
            Err(CryptoError::Retired)
        );
    }

    #[test]
    fn pid_form_mismatch_rejected() {
        let mut chan = aead_channel();
        let err = chan
            .init_pid(PidConfig::for_form(crate::pid::PidForm::TimeSalted))
            .unwrap_err();
        assert_eq!(
            err,
            CryptoError::PidFormMismatch { expected: crate::pid::PidForm::Seq }
        );
    }

    #[test]
    fn key_id_progression_skips_zero() {
        assert_eq!(next_key_id(0), 1);
        assert_eq!(next_key_id(6), 7);
        assert_eq!(next_key_id(7), 1);
    }
}
