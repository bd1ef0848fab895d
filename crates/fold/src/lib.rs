#![forbid(unsafe_code)]

use attest::{AttestError, ChainAttestation, ChainOrigin, ChainProver, TransitionClaim};
use common::Digest32;
use limits::ValidationLimits;
use log::debug;
use message::{Message, MessageValidator};
use thiserror::Error;

pub use attest::{compute_accumulator_digest, compute_ruleset_digest};
pub use message::transition;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum FoldError {
    #[error("base case must start at watermark 0, got {initial}")]
    MalformedBaseCase { initial: u64 },
    #[error("prior attestation rejected by verifier")]
    PriorAttestationRejected,
    #[error("stale attestation: expected final watermark {expected}, attested {attested}")]
    StaleAttestation { expected: u64, attested: u64 },
    #[error("prior attestation folded under a different ruleset")]
    RulesetMismatch,
    #[error("claimed watermark {claimed} disagrees with recomputed {computed}")]
    TransitionMismatch { claimed: u64, computed: u64 },
    #[error("chain length overflow")]
    StepOverflow,
}

impl From<AttestError> for FoldError {
    fn from(err: AttestError) -> Self {
        match err {
            AttestError::MalformedGenesis { initial } => FoldError::MalformedBaseCase { initial },
            AttestError::PriorRejected => FoldError::PriorAttestationRejected,
            AttestError::RulesetMismatch => FoldError::RulesetMismatch,
            AttestError::TransitionMismatch { claimed, computed } => {
                FoldError::TransitionMismatch { claimed, computed }
            }
            AttestError::StepOverflow => FoldError::StepOverflow,
        }
    }
}

/// Recursive accumulator folding messages into a single chain attestation.
///
/// Each step hands the prover the prior attestation and the next message; the
/// prover verifies the prior and recomputes the transition before signing, so
/// the last attestation of a chain covers every transition in it.
#[derive(Debug, Clone)]
pub struct FoldStep<'a, P> {
    prover: &'a P,
    limits: ValidationLimits,
    validator: MessageValidator,
    ruleset_digest: Digest32,
}

impl<'a, P: ChainProver> FoldStep<'a, P> {
    pub fn new(prover: &'a P, limits: ValidationLimits) -> Self {
        Self {
            prover,
            limits,
            validator: MessageValidator::new(limits),
            ruleset_digest: compute_ruleset_digest(&limits),
        }
    }

    pub fn validator(&self) -> &MessageValidator {
        &self.validator
    }

    pub fn ruleset_digest(&self) -> Digest32 {
        self.ruleset_digest
    }

    pub fn transition(&self, current: u64, message: &Message) -> u64 {
        transition(&self.validator, current, message)
    }

    /// Attest the empty chain at watermark 0.
    pub fn base_case(&self, initial_watermark: u64) -> Result<ChainAttestation, FoldError> {
        self.anchor(ChainOrigin::Genesis, initial_watermark)
    }

    /// Attest an empty chain anchored at an already committed watermark.
    ///
    /// The anchor is only meaningful to a gate whose committed watermark equals it.
    pub fn resume(&self, committed_watermark: u64) -> Result<ChainAttestation, FoldError> {
        self.anchor(ChainOrigin::Resumed, committed_watermark)
    }

    fn anchor(&self, origin: ChainOrigin, watermark: u64) -> Result<ChainAttestation, FoldError> {
        let claim = TransitionClaim::Anchor { origin, watermark };
        Ok(self.prover.attest(&claim, &self.limits)?)
    }

    /// Extend a verified chain by one message.
    ///
    /// Fails without producing an attestation if the prior attestation does not
    /// verify, is stale against `prior_final_watermark`, or if
    /// `candidate_next_watermark` is not what [`transition`] computes.
    pub fn fold_next(
        &self,
        prior_final_watermark: u64,
        prior: &ChainAttestation,
        candidate_next_watermark: u64,
        next_message: &Message,
    ) -> Result<ChainAttestation, FoldError> {
        if prior.final_watermark != prior_final_watermark {
            return Err(FoldError::StaleAttestation {
                expected: prior_final_watermark,
                attested: prior.final_watermark,
            });
        }

        let claim = TransitionClaim::Step {
            prior,
            candidate: candidate_next_watermark,
            message: next_message,
        };
        let next = self.prover.attest(&claim, &self.limits)?;

        if next.final_watermark == prior_final_watermark {
            debug!(
                "message {} left watermark at {}",
                next_message.message_number, prior_final_watermark
            );
        }
        debug!(
            "fold step {}: watermark {} -> {}",
            next.step_count, prior_final_watermark, next.final_watermark
        );
        Ok(next)
    }

    /// Fold every message onto `start`, computing each candidate with [`transition`].
    pub fn fold_all(
        &self,
        start: ChainAttestation,
        messages: &[Message],
    ) -> Result<ChainAttestation, FoldError> {
        messages.iter().try_fold(start, |proof, message| {
            let current = proof.final_watermark;
            let next = self.transition(current, message);
            self.fold_next(current, &proof, next, message)
        })
    }
}
