#![forbid(unsafe_code)]

mod commit_log;

use std::sync::{Mutex, MutexGuard, PoisonError};

use attest::{ChainAttestation, ChainProver, ChainVerifier};
use common::Digest32;
use fold::{compute_ruleset_digest, FoldError, FoldStep};
use limits::{ValidationLimits, DEFAULT_LIMITS};
use log::{info, warn};
use message::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use commit_log::{CommitLog, CommitLogError, CommitRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Limits every accepted chain must have been folded under.
    pub limits: ValidationLimits,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            limits: DEFAULT_LIMITS,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum GateError {
    #[error("attestation verification failed")]
    VerificationFailed,
    #[error("attestation built against watermark {attested}, committed watermark is {committed}")]
    StaleBase { committed: u64, attested: u64 },
    #[error("attestation ruleset does not match the gate configuration")]
    RulesetMismatch,
    #[error("chain of {len} messages exceeds limit {limit}")]
    ChainTooLong { len: usize, limit: usize },
    #[error("fold failed: {0}")]
    Fold(#[from] FoldError),
    #[error("commit log error: {0}")]
    CommitLog(#[from] CommitLogError),
    #[error("persistence error: {0}")]
    Persistence(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitStatus {
    /// The watermark moved forward.
    Advanced,
    /// The attestation was accepted but did not raise the watermark.
    Unchanged,
    /// The attestation was the one most recently committed; nothing was written.
    Replayed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub prior_watermark: u64,
    pub watermark: u64,
    pub status: CommitStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSnapshot {
    pub watermark: u64,
    pub last_acc_digest: Option<Digest32>,
    pub log: CommitLog,
}

impl GateSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, GateError> {
        serde_json::to_vec(self).map_err(|err| GateError::Persistence(err.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GateError> {
        serde_json::from_slice(bytes).map_err(|err| GateError::Persistence(err.to_string()))
    }
}

#[derive(Debug, Clone)]
struct GateState {
    watermark: u64,
    last_acc_digest: Option<Digest32>,
    log: CommitLog,
}

/// Holder of the committed watermark.
///
/// The watermark only moves through [`StateGate::process_messages`], which runs
/// its verify-compare-write sequence under a single lock.
#[derive(Debug)]
pub struct StateGate<V> {
    verifier: V,
    config: GateConfig,
    ruleset_digest: Digest32,
    state: Mutex<GateState>,
}

impl<V: ChainVerifier> StateGate<V> {
    pub fn new(verifier: V) -> Self {
        Self::with_config(verifier, GateConfig::default())
    }

    pub fn with_config(verifier: V, config: GateConfig) -> Self {
        Self {
            verifier,
            ruleset_digest: compute_ruleset_digest(&config.limits),
            state: Mutex::new(GateState {
                watermark: 0,
                last_acc_digest: None,
                log: CommitLog::new(config.limits.max_commit_records),
            }),
            config,
        }
    }

    /// Rebuild a gate from a snapshot, re-validating its commit log.
    ///
    /// The log's retention is reset to `config`; records beyond it are evicted.
    pub fn restore(
        verifier: V,
        config: GateConfig,
        mut snapshot: GateSnapshot,
    ) -> Result<Self, GateError> {
        snapshot.log.validate_chain()?;
        match snapshot.log.last() {
            Some(last) => {
                if last.watermark != snapshot.watermark
                    || Some(last.acc_digest) != snapshot.last_acc_digest
                {
                    return Err(GateError::Persistence(
                        "snapshot head disagrees with commit log".into(),
                    ));
                }
            }
            None => {
                if snapshot.watermark != 0 || snapshot.last_acc_digest.is_some() {
                    return Err(GateError::Persistence(
                        "snapshot has a watermark but no commit records".into(),
                    ));
                }
            }
        }

        snapshot
            .log
            .set_capacity(config.limits.max_commit_records);

        Ok(Self {
            verifier,
            ruleset_digest: compute_ruleset_digest(&config.limits),
            state: Mutex::new(GateState {
                watermark: snapshot.watermark,
                last_acc_digest: snapshot.last_acc_digest,
                log: snapshot.log,
            }),
            config,
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn get_watermark(&self) -> u64 {
        self.lock_state().watermark
    }

    pub fn commit_log(&self) -> CommitLog {
        self.lock_state().log.clone()
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let state = self.lock_state();
        GateSnapshot {
            watermark: state.watermark,
            last_acc_digest: state.last_acc_digest,
            log: state.log.clone(),
        }
    }

    /// Verify a chain attestation and commit its final watermark if it is higher.
    ///
    /// Either the watermark and commit log are both updated, or neither is.
    pub fn process_messages(
        &self,
        attestation: &ChainAttestation,
    ) -> Result<CommitOutcome, GateError> {
        if !self.verifier.verify(attestation) {
            warn!(
                "rejected attestation {}: verification failed",
                hex::encode(attestation.acc_digest)
            );
            return Err(GateError::VerificationFailed);
        }
        if attestation.ruleset_digest != self.ruleset_digest {
            warn!(
                "rejected attestation {}: ruleset mismatch",
                hex::encode(attestation.acc_digest)
            );
            return Err(GateError::RulesetMismatch);
        }

        let mut state = self.lock_state();
        let current = state.watermark;

        if state.last_acc_digest == Some(attestation.acc_digest) {
            return Ok(CommitOutcome {
                prior_watermark: current,
                watermark: current,
                status: CommitStatus::Replayed,
            });
        }
        if attestation.initial_watermark != current {
            warn!(
                "rejected attestation {}: stale base {} (committed {})",
                hex::encode(attestation.acc_digest),
                attestation.initial_watermark,
                current
            );
            return Err(GateError::StaleBase {
                committed: current,
                attested: attestation.initial_watermark,
            });
        }

        let new_watermark = current.max(attestation.final_watermark);
        let record = state
            .log
            .append(attestation.acc_digest, current, new_watermark);
        state.watermark = new_watermark;
        state.last_acc_digest = Some(attestation.acc_digest);

        info!(
            "commit {}: watermark {} -> {} ({} steps)",
            record.seq, current, new_watermark, attestation.step_count
        );

        Ok(CommitOutcome {
            prior_watermark: current,
            watermark: new_watermark,
            status: if record.advanced() {
                CommitStatus::Advanced
            } else {
                CommitStatus::Unchanged
            },
        })
    }

    /// Fold `messages` from the committed watermark and submit the result.
    ///
    /// Returns [`GateError::StaleBase`] if another submission commits between the
    /// fold and the submit; the caller re-folds from the new watermark.
    pub fn submit_chain<P>(&self, prover: &P, messages: &[Message]) -> Result<u64, GateError>
    where
        P: ChainProver,
    {
        let limit = self.config.limits.max_chain_messages;
        if messages.len() > limit {
            return Err(GateError::ChainTooLong {
                len: messages.len(),
                limit,
            });
        }

        let fold = FoldStep::new(prover, self.config.limits);
        let start = match self.get_watermark() {
            0 => fold.base_case(0)?,
            committed => fold.resume(committed)?,
        };
        let proof = fold.fold_all(start, messages)?;
        let outcome = self.process_messages(&proof)?;
        Ok(outcome.watermark)
    }

    // The state is replaced field by field after every check has passed, so a
    // poisoned guard still holds a consistent state.
    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
