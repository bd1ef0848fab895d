use common::{digest_parts, Digest32, DOMAIN, ZERO_DIGEST};
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One committed submission, chained to its predecessor by digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub seq: u64,
    pub acc_digest: Digest32,
    pub prior_watermark: u64,
    pub watermark: u64,
    pub prev_record_digest: Digest32,
    pub record_digest: Digest32,
}

impl CommitRecord {
    pub fn advanced(&self) -> bool {
        self.watermark > self.prior_watermark
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CommitLogError {
    #[error("commit log chain broken at index {0}")]
    ChainBroken(usize),
    #[error("commit log watermark regressed at index {0}")]
    Regression(usize),
}

/// Append-only, hash-chained audit log of gate commits.
///
/// Holds at most `max_records`; evicting the oldest record re-anchors the chain
/// on that record's digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLog {
    records: Vec<CommitRecord>,
    base_digest: Digest32,
    next_seq: u64,
    max_records: usize,
}

impl CommitLog {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Vec::new(),
            base_digest: ZERO_DIGEST,
            next_seq: 0,
            max_records: max_records.max(1),
        }
    }

    pub fn records(&self) -> &[CommitRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&CommitRecord> {
        self.records.last()
    }

    pub fn head_digest(&self) -> Digest32 {
        self.records
            .last()
            .map(|record| record.record_digest)
            .unwrap_or(self.base_digest)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn append(
        &mut self,
        acc_digest: Digest32,
        prior_watermark: u64,
        watermark: u64,
    ) -> CommitRecord {
        self.evict_to(self.max_records.max(1) - 1);

        let seq = self.next_seq;
        let prev_record_digest = self.head_digest();
        let record = CommitRecord {
            seq,
            acc_digest,
            prior_watermark,
            watermark,
            prev_record_digest,
            record_digest: compute_record_digest(
                seq,
                &acc_digest,
                prior_watermark,
                watermark,
                &prev_record_digest,
            ),
        };
        self.next_seq = self.next_seq.wrapping_add(1);
        self.records.push(record.clone());
        record
    }

    /// Reset retention to `max_records` (at least 1), evicting the oldest
    /// records that no longer fit.
    pub(crate) fn set_capacity(&mut self, max_records: usize) {
        self.max_records = max_records.max(1);
        self.evict_to(self.max_records);
    }

    fn evict_to(&mut self, keep: usize) {
        if self.records.len() <= keep {
            return;
        }
        let excess = self.records.len() - keep;
        for evicted in self.records.drain(..excess) {
            self.base_digest = evicted.record_digest;
            warn!(
                "commit log limit {} reached, evicted record {}",
                self.max_records, evicted.seq
            );
        }
    }

    /// Validate digests, linkage, sequence numbers, and watermark monotonicity.
    pub fn validate_chain(&self) -> Result<(), CommitLogError> {
        let mut prev_digest = self.base_digest;
        let mut prev: Option<&CommitRecord> = None;

        for (idx, record) in self.records.iter().enumerate() {
            if record.prev_record_digest != prev_digest {
                return Err(CommitLogError::ChainBroken(idx));
            }
            let computed = compute_record_digest(
                record.seq,
                &record.acc_digest,
                record.prior_watermark,
                record.watermark,
                &record.prev_record_digest,
            );
            if computed != record.record_digest {
                return Err(CommitLogError::ChainBroken(idx));
            }
            if record.watermark < record.prior_watermark {
                return Err(CommitLogError::Regression(idx));
            }
            if let Some(prev) = prev {
                if prev.seq.checked_add(1) != Some(record.seq) {
                    return Err(CommitLogError::ChainBroken(idx));
                }
                if record.prior_watermark != prev.watermark {
                    return Err(CommitLogError::Regression(idx));
                }
            }

            prev_digest = record.record_digest;
            prev = Some(record);
        }

        if let Some(last) = prev {
            if last.seq.checked_add(1) != Some(self.next_seq) {
                return Err(CommitLogError::ChainBroken(self.records.len() - 1));
            }
        }
        Ok(())
    }
}

fn compute_record_digest(
    seq: u64,
    acc_digest: &Digest32,
    prior_watermark: u64,
    watermark: u64,
    prev_record_digest: &Digest32,
) -> Digest32 {
    digest_parts(
        DOMAIN,
        "CommitRecord",
        "v1",
        &[
            &seq.to_le_bytes(),
            acc_digest,
            &prior_watermark.to_le_bytes(),
            &watermark.to_le_bytes(),
            prev_record_digest,
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appended_records_chain_together() {
        let mut log = CommitLog::new(8);
        let first = log.append([1u8; 32], 0, 1);
        let second = log.append([2u8; 32], 1, 1);
        assert_eq!(first.prev_record_digest, ZERO_DIGEST);
        assert_eq!(second.prev_record_digest, first.record_digest);
        assert!(first.advanced());
        assert!(!second.advanced());
        assert!(log.validate_chain().is_ok());
    }

    #[test]
    fn tampering_is_detected() {
        let mut log = CommitLog::new(8);
        log.append([1u8; 32], 0, 1);
        log.append([2u8; 32], 1, 4);

        let mut tampered = log.clone();
        tampered.records[1].watermark = 9;
        assert_eq!(
            tampered.validate_chain(),
            Err(CommitLogError::ChainBroken(1))
        );

        let mut dropped = log.clone();
        dropped.records.remove(0);
        assert_eq!(dropped.validate_chain(), Err(CommitLogError::ChainBroken(0)));
    }

    #[test]
    fn eviction_reanchors_chain() {
        let mut log = CommitLog::new(2);
        log.append([1u8; 32], 0, 1);
        log.append([2u8; 32], 1, 2);
        log.append([3u8; 32], 2, 3);
        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[0].seq, 1);
        assert!(log.validate_chain().is_ok());
    }

    #[test]
    fn zero_retention_still_appends() {
        let mut log = CommitLog {
            records: Vec::new(),
            base_digest: ZERO_DIGEST,
            next_seq: 0,
            max_records: 0,
        };
        log.append([1u8; 32], 0, 1);
        log.append([2u8; 32], 1, 2);
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].seq, 1);
        assert!(log.validate_chain().is_ok());
    }

    #[test]
    fn shrinking_capacity_evicts_oldest() {
        let mut log = CommitLog::new(8);
        for step in 0..5u8 {
            log.append([step; 32], u64::from(step), u64::from(step) + 1);
        }
        log.set_capacity(3);
        assert_eq!(log.len(), 3);
        assert_eq!(log.records()[0].seq, 2);
        assert_eq!(log.records()[0].prev_record_digest, log.base_digest);
        assert!(log.validate_chain().is_ok());
    }

    #[test]
    fn sequence_at_u64_max_is_rejected_not_overflowed() {
        let mut log = CommitLog::new(8);
        log.append([1u8; 32], 0, 1);

        let mut forged = log.clone();
        let record = &mut forged.records[0];
        record.seq = u64::MAX;
        record.record_digest = compute_record_digest(
            record.seq,
            &record.acc_digest,
            record.prior_watermark,
            record.watermark,
            &record.prev_record_digest,
        );
        assert_eq!(forged.validate_chain(), Err(CommitLogError::ChainBroken(0)));

        let mut pair = CommitLog::new(8);
        pair.append([1u8; 32], 0, 1);
        pair.append([2u8; 32], 1, 2);
        let prev_digest = pair.base_digest;
        let first = &mut pair.records[0];
        first.seq = u64::MAX;
        first.prev_record_digest = prev_digest;
        first.record_digest = compute_record_digest(
            first.seq,
            &first.acc_digest,
            first.prior_watermark,
            first.watermark,
            &first.prev_record_digest,
        );
        let first_digest = first.record_digest;
        let second = &mut pair.records[1];
        second.prev_record_digest = first_digest;
        second.record_digest = compute_record_digest(
            second.seq,
            &second.acc_digest,
            second.prior_watermark,
            second.watermark,
            &second.prev_record_digest,
        );
        assert_eq!(pair.validate_chain(), Err(CommitLogError::ChainBroken(1)));
    }
}
