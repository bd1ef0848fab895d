#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEpoch {
    pub epoch_id: u64,
    pub key_id: String,
    pub public_key: [u8; 32],
}

/// Signing key for one attestor epoch.
#[derive(Debug, Clone)]
struct ActiveKey {
    epoch_id: u64,
    key_id: String,
    signing_key: SigningKey,
}

impl ActiveKey {
    fn new(epoch_id: u64, signing_key: SigningKey) -> Self {
        Self {
            epoch_id,
            key_id: key_id_for_epoch(epoch_id),
            signing_key,
        }
    }

    fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    fn describe(&self) -> KeyEpoch {
        KeyEpoch {
            epoch_id: self.epoch_id,
            key_id: self.key_id.clone(),
            public_key: self.public_key(),
        }
    }
}

/// Attestor keystore: one active signing key plus the public keys of every
/// epoch it has rotated away from.
#[derive(Debug, Clone)]
pub struct KeyStore {
    active: ActiveKey,
    retired: KeyRing,
}

impl KeyStore {
    /// Keystore with a freshly generated signing key.
    pub fn new_dev_keystore(epoch_id: u64) -> Self {
        Self::with_signing_key(epoch_id, SigningKey::generate(&mut OsRng))
    }

    /// Keystore from a fixed seed. Deterministic; meant for tests and demos.
    pub fn from_seed(epoch_id: u64, seed: [u8; 32]) -> Self {
        Self::with_signing_key(epoch_id, SigningKey::from_bytes(&seed))
    }

    fn with_signing_key(epoch_id: u64, signing_key: SigningKey) -> Self {
        Self {
            active: ActiveKey::new(epoch_id, signing_key),
            retired: KeyRing::default(),
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.active.epoch_id
    }

    pub fn current_key_id(&self) -> &str {
        &self.active.key_id
    }

    pub fn public_key_for_epoch(&self, epoch_id: u64) -> Option<[u8; 32]> {
        if epoch_id == self.active.epoch_id {
            Some(self.active.public_key())
        } else {
            self.retired.public_key_for_epoch(epoch_id)
        }
    }

    /// Retire the active key and start `new_epoch_id` with a fresh one.
    ///
    /// Signatures from retired epochs keep verifying through [`KeyStore::key_ring`].
    pub fn rotate(&mut self, new_epoch_id: u64) -> KeyEpoch {
        let next = ActiveKey::new(new_epoch_id, SigningKey::generate(&mut OsRng));
        let retired = std::mem::replace(&mut self.active, next);
        self.retired.insert(retired.epoch_id, retired.public_key());
        self.active.describe()
    }

    pub fn sign(&self, preimage: &[u8]) -> [u8; 64] {
        self.active.signing_key.sign(preimage).to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.active.signing_key.verifying_key()
    }

    /// Public half of every epoch this keystore has held, current epoch included.
    pub fn key_ring(&self) -> KeyRing {
        let mut ring = self.retired.clone();
        ring.insert(self.active.epoch_id, self.active.public_key());
        ring
    }
}

/// Verification-only view of attestor public keys, indexed by epoch.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRing {
    keys: BTreeMap<u64, [u8; 32]>,
}

impl KeyRing {
    pub fn insert(&mut self, epoch_id: u64, public_key: [u8; 32]) {
        self.keys.insert(epoch_id, public_key);
    }

    pub fn public_key_for_epoch(&self, epoch_id: u64) -> Option<[u8; 32]> {
        self.keys.get(&epoch_id).copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Verify an Ed25519 signature over `preimage`. Malformed keys or signatures verify as false.
pub fn verify_signature(public_key: [u8; 32], preimage: &[u8], signature: &[u8]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key) else {
        return false;
    };
    let Ok(signature_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature_bytes);

    verifying_key.verify(preimage, &signature).is_ok()
}

fn key_id_for_epoch(epoch_id: u64) -> String {
    format!("attestor-epoch-{}", epoch_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verifies_against_current_epoch() {
        let keystore = KeyStore::from_seed(3, [7u8; 32]);
        let sig = keystore.sign(b"preimage");
        let pubkey = keystore.public_key_for_epoch(3).unwrap();
        assert!(verify_signature(pubkey, b"preimage", &sig));
        assert!(!verify_signature(pubkey, b"preimagE", &sig));
        assert!(!verify_signature(pubkey, b"preimage", &sig[..63]));
    }

    #[test]
    fn rotation_retains_previous_public_key() {
        let mut keystore = KeyStore::from_seed(1, [1u8; 32]);
        let sig = keystore.sign(b"epoch one");
        let epoch_one_key = keystore.public_key_for_epoch(1).unwrap();

        let next = keystore.rotate(2);
        assert_eq!(keystore.current_epoch(), 2);
        assert_eq!(keystore.current_key_id(), "attestor-epoch-2");
        assert_eq!(next.key_id, "attestor-epoch-2");
        assert_eq!(keystore.public_key_for_epoch(1), Some(epoch_one_key));
        assert!(verify_signature(epoch_one_key, b"epoch one", &sig));

        let ring = keystore.key_ring();
        assert_eq!(ring.len(), 2);
        assert_ne!(next.public_key, epoch_one_key);
        assert_eq!(ring.public_key_for_epoch(1), Some(epoch_one_key));
        assert_eq!(ring.public_key_for_epoch(2), Some(next.public_key));
    }

    #[test]
    fn signatures_from_other_epochs_do_not_cross_verify() {
        let mut keystore = KeyStore::from_seed(1, [2u8; 32]);
        let old_sig = keystore.sign(b"payload");
        keystore.rotate(2);
        let new_sig = keystore.sign(b"payload");

        let ring = keystore.key_ring();
        let old_key = ring.public_key_for_epoch(1).unwrap();
        let new_key = ring.public_key_for_epoch(2).unwrap();
        assert!(verify_signature(old_key, b"payload", &old_sig));
        assert!(verify_signature(new_key, b"payload", &new_sig));
        assert!(!verify_signature(old_key, b"payload", &new_sig));
        assert_eq!(keystore.public_key_for_epoch(3), None);
    }

    #[test]
    fn seeded_keystores_are_deterministic() {
        let a = KeyStore::from_seed(0, [9u8; 32]);
        let b = KeyStore::from_seed(0, [9u8; 32]);
        assert_eq!(a.verifying_key(), b.verifying_key());
    }
}
