#![forbid(unsafe_code)]

//! Attestation capability for watermark chains.
//!
//! A [`ChainAttestation`] is a signed hash-chain accumulator: it binds the
//! chain's initial and final watermark, its length, the ruleset it was folded
//! under, and the accumulator digest over every transition. The prover is never
//! handed a result to sign. It is handed the evidence (the prior attestation and
//! the next message) and recomputes the transition itself, so a signature only
//! exists for watermarks reachable through valid messages.

use blake3::Hasher;
use common::{blake3_digest, digest_parts, Digest32, DOMAIN, ZERO_DIGEST};
use keys::{verify_signature, KeyRing, KeyStore};
use limits::ValidationLimits;
use message::{transition, Message, MessageValidator};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const SIGN_DOMAIN: &[u8] = b"WMK:SIGN:CHAIN_ATTESTATION";
const ACCUMULATOR_DOMAIN: &[u8] = b"WMK:FOLD:ACC";

/// Where a chain was anchored.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainOrigin {
    /// Started from the zero watermark.
    Genesis,
    /// Started from a previously committed watermark.
    Resumed,
}

impl ChainOrigin {
    fn label(self) -> &'static str {
        match self {
            ChainOrigin::Genesis => "GENESIS",
            ChainOrigin::Resumed => "RESUMED",
        }
    }
}

/// What a prover is asked to attest, together with the evidence for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionClaim<'a> {
    /// An empty chain anchored at `watermark`. Genesis anchors must be 0.
    Anchor {
        origin: ChainOrigin,
        watermark: u64,
    },
    /// `prior` extended by `message`, claimed to end at `candidate`.
    Step {
        prior: &'a ChainAttestation,
        candidate: u64,
        message: &'a Message,
    },
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainAttestation {
    pub origin: ChainOrigin,
    pub initial_watermark: u64,
    pub final_watermark: u64,
    pub step_count: u64,
    pub ruleset_digest: Digest32,
    pub prev_acc_digest: Digest32,
    pub acc_digest: Digest32,
    pub epoch_id: u64,
    pub attestor_key_id: String,
    pub signature: Vec<u8>,
}

pub trait ChainProver {
    /// Check `claim` under `limits` and sign it. Refuses anything the
    /// transition rule does not produce.
    fn attest(
        &self,
        claim: &TransitionClaim<'_>,
        limits: &ValidationLimits,
    ) -> Result<ChainAttestation, AttestError>;
}

pub trait ChainVerifier {
    /// Accepts or rejects; never panics on malformed input.
    fn verify(&self, attestation: &ChainAttestation) -> bool;
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum AttestError {
    #[error("genesis anchor must be watermark 0, got {initial}")]
    MalformedGenesis { initial: u64 },
    #[error("prior attestation rejected by verifier")]
    PriorRejected,
    #[error("prior attestation folded under a different ruleset")]
    RulesetMismatch,
    #[error("claimed watermark {claimed} disagrees with recomputed {computed}")]
    TransitionMismatch { claimed: u64, computed: u64 },
    #[error("chain length overflow")]
    StepOverflow,
}

/// Ruleset digest bound into every attestation folded under `limits`.
pub fn compute_ruleset_digest(limits: &ValidationLimits) -> Digest32 {
    blake3_digest(DOMAIN, "Ruleset", "v1", &limits.ruleset_bytes())
}

/// Digest anchoring a zero-length chain.
pub fn genesis_acc_digest(
    origin: ChainOrigin,
    initial_watermark: u64,
    ruleset_digest: Digest32,
) -> Digest32 {
    digest_parts(
        DOMAIN,
        "ChainGenesis",
        "v1",
        &[
            origin.label().as_bytes(),
            &initial_watermark.to_le_bytes(),
            &ruleset_digest,
        ],
    )
}

pub fn compute_accumulator_digest(
    prev_acc: Digest32,
    step: u64,
    prior_watermark: u64,
    next_watermark: u64,
    message_digest: Digest32,
) -> Digest32 {
    let mut hasher = Hasher::new();
    hasher.update(ACCUMULATOR_DOMAIN);
    hasher.update(&prev_acc);
    hasher.update(&step.to_le_bytes());
    hasher.update(&prior_watermark.to_le_bytes());
    hasher.update(&next_watermark.to_le_bytes());
    hasher.update(&message_digest);
    *hasher.finalize().as_bytes()
}

/// Structural checks every honestly produced attestation satisfies.
pub fn has_valid_shape(attestation: &ChainAttestation) -> bool {
    if attestation.final_watermark < attestation.initial_watermark {
        return false;
    }
    if attestation.origin == ChainOrigin::Genesis && attestation.initial_watermark != 0 {
        return false;
    }
    if attestation.step_count == 0 {
        attestation.final_watermark == attestation.initial_watermark
            && attestation.prev_acc_digest == ZERO_DIGEST
            && attestation.acc_digest
                == genesis_acc_digest(
                    attestation.origin,
                    attestation.initial_watermark,
                    attestation.ruleset_digest,
                )
    } else {
        attestation.prev_acc_digest != ZERO_DIGEST
    }
}

/// Unsigned body of an attestation, derived from checked evidence only.
struct CheckedClaim {
    origin: ChainOrigin,
    initial_watermark: u64,
    final_watermark: u64,
    step_count: u64,
    ruleset_digest: Digest32,
    prev_acc_digest: Digest32,
    acc_digest: Digest32,
}

/// Check a claim's evidence and derive the body to sign.
///
/// `verify_prior` is the prover's own verifier; a step is only attested on top
/// of a prior this prover accepts.
fn check_claim(
    claim: &TransitionClaim<'_>,
    limits: &ValidationLimits,
    verify_prior: impl Fn(&ChainAttestation) -> bool,
) -> Result<CheckedClaim, AttestError> {
    let ruleset_digest = compute_ruleset_digest(limits);

    match *claim {
        TransitionClaim::Anchor { origin, watermark } => {
            if origin == ChainOrigin::Genesis && watermark != 0 {
                return Err(AttestError::MalformedGenesis { initial: watermark });
            }
            Ok(CheckedClaim {
                origin,
                initial_watermark: watermark,
                final_watermark: watermark,
                step_count: 0,
                ruleset_digest,
                prev_acc_digest: ZERO_DIGEST,
                acc_digest: genesis_acc_digest(origin, watermark, ruleset_digest),
            })
        }
        TransitionClaim::Step {
            prior,
            candidate,
            message,
        } => {
            if !verify_prior(prior) {
                return Err(AttestError::PriorRejected);
            }
            if prior.ruleset_digest != ruleset_digest {
                return Err(AttestError::RulesetMismatch);
            }

            let current = prior.final_watermark;
            let computed = transition(&MessageValidator::new(*limits), current, message);
            if computed != candidate {
                return Err(AttestError::TransitionMismatch {
                    claimed: candidate,
                    computed,
                });
            }

            let step_count = prior
                .step_count
                .checked_add(1)
                .ok_or(AttestError::StepOverflow)?;
            Ok(CheckedClaim {
                origin: prior.origin,
                initial_watermark: prior.initial_watermark,
                final_watermark: computed,
                step_count,
                ruleset_digest,
                prev_acc_digest: prior.acc_digest,
                acc_digest: compute_accumulator_digest(
                    prior.acc_digest,
                    step_count,
                    current,
                    computed,
                    message.digest(),
                ),
            })
        }
    }
}

/// Prover backed by an Ed25519 attestor keystore.
#[derive(Debug, Clone)]
pub struct KeyStoreAttestor {
    keystore: KeyStore,
}

impl KeyStoreAttestor {
    pub fn new(keystore: KeyStore) -> Self {
        Self { keystore }
    }

    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    /// Rotate the signing key. Attestations from earlier epochs keep verifying.
    pub fn rotate(&mut self, new_epoch_id: u64) {
        self.keystore.rotate(new_epoch_id);
    }

    /// Verifier holding only the public keys of this attestor.
    pub fn verifier(&self) -> AttestationVerifier {
        AttestationVerifier::new(self.keystore.key_ring())
    }
}

impl ChainProver for KeyStoreAttestor {
    fn attest(
        &self,
        claim: &TransitionClaim<'_>,
        limits: &ValidationLimits,
    ) -> Result<ChainAttestation, AttestError> {
        let checked = check_claim(claim, limits, |prior| self.verify(prior))?;

        let mut attestation = ChainAttestation {
            origin: checked.origin,
            initial_watermark: checked.initial_watermark,
            final_watermark: checked.final_watermark,
            step_count: checked.step_count,
            ruleset_digest: checked.ruleset_digest,
            prev_acc_digest: checked.prev_acc_digest,
            acc_digest: checked.acc_digest,
            epoch_id: self.keystore.current_epoch(),
            attestor_key_id: self.keystore.current_key_id().to_string(),
            signature: Vec::new(),
        };
        attestation.signature = self
            .keystore
            .sign(&attestation_preimage(&attestation))
            .to_vec();

        Ok(attestation)
    }
}

impl ChainVerifier for KeyStoreAttestor {
    fn verify(&self, attestation: &ChainAttestation) -> bool {
        match self.keystore.public_key_for_epoch(attestation.epoch_id) {
            Some(pubkey) => verify_attestation(attestation, pubkey),
            None => false,
        }
    }
}

/// Verifier holding public keys only.
#[derive(Debug, Clone, Default)]
pub struct AttestationVerifier {
    ring: KeyRing,
}

impl AttestationVerifier {
    pub fn new(ring: KeyRing) -> Self {
        Self { ring }
    }

    pub fn ring(&self) -> &KeyRing {
        &self.ring
    }
}

impl ChainVerifier for AttestationVerifier {
    fn verify(&self, attestation: &ChainAttestation) -> bool {
        match self.ring.public_key_for_epoch(attestation.epoch_id) {
            Some(pubkey) => verify_attestation(attestation, pubkey),
            None => false,
        }
    }
}

/// Verify shape and signature of an attestation against a single public key.
pub fn verify_attestation(attestation: &ChainAttestation, pubkey: [u8; 32]) -> bool {
    if !has_valid_shape(attestation) {
        return false;
    }
    verify_signature(
        pubkey,
        &attestation_preimage(attestation),
        &attestation.signature,
    )
}

fn attestation_preimage(attestation: &ChainAttestation) -> Vec<u8> {
    let mut preimage = Vec::with_capacity(SIGN_DOMAIN.len() + 192);
    preimage.extend_from_slice(SIGN_DOMAIN);
    preimage.extend_from_slice(&attestation.epoch_id.to_le_bytes());
    preimage.extend_from_slice(&(attestation.attestor_key_id.len() as u64).to_le_bytes());
    preimage.extend_from_slice(attestation.attestor_key_id.as_bytes());
    preimage.extend_from_slice(attestation.origin.label().as_bytes());
    preimage.extend_from_slice(&attestation.initial_watermark.to_le_bytes());
    preimage.extend_from_slice(&attestation.final_watermark.to_le_bytes());
    preimage.extend_from_slice(&attestation.step_count.to_le_bytes());
    preimage.extend_from_slice(&attestation.ruleset_digest);
    preimage.extend_from_slice(&attestation.prev_acc_digest);
    preimage.extend_from_slice(&attestation.acc_digest);
    preimage
}
