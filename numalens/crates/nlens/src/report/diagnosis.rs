//! Diagnosis Records
//!
//! Plain snapshots taken at report time from the live atomic records. The
//! diagnosis owns copies of every counter it prints, so the report is
//! internally consistent even if a straggler thread is still mutating the
//! records underneath, and the structures serialize directly for the JSON
//! rendition.

use crate::record::{CacheLineRecord, ObjectRecord};
use serde::Serialize;

use super::queue::BoundedPriorityQueue;
use super::score::invalidation_score;

/// One escalated cache line inside an object's footprint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheLineFinding {
    pub line_base: usize,
    pub first_access_thread: u32,
    pub owner_thread: u32,
    pub invalidations_first: u64,
    pub invalidations_others: u64,
    pub score: u64,
}

impl CacheLineFinding {
    pub fn snapshot(line: &CacheLineRecord) -> Self {
        let invalidations_first = line.invalidations_first();
        let invalidations_others = line.invalidations_others();
        Self {
            line_base: line.line_base(),
            first_access_thread: line.first_access_thread(),
            owner_thread: line.owner_thread(),
            invalidations_first,
            invalidations_others,
            score: invalidation_score(invalidations_first, invalidations_others),
        }
    }
}

/// One reported heap object with its worst cache lines.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectDiagnosis {
    pub start_address: usize,
    pub size: usize,
    pub site_fingerprint: u64,
    pub alloc_thread: u32,
    pub accesses_by_alloc_thread: u64,
    pub accesses_by_others: u64,
    pub invalidations_attributed: u64,
    pub score: u64,
    pub top_lines: Vec<CacheLineFinding>,
}

/// Builder for one object's diagnosis: snapshots the object, collects its
/// candidate cache lines through a bounded queue, and seals into the
/// serializable record.
pub struct DiagnosisBuilder {
    object: ObjectDiagnosis,
    lines: BoundedPriorityQueue<CacheLineFinding>,
    line_score_total: u64,
}

impl DiagnosisBuilder {
    /// Snapshot `object` as the diagnosis subject.
    pub fn new(object: &ObjectRecord, top_lines: usize) -> Self {
        Self {
            object: ObjectDiagnosis {
                start_address: object.start_address(),
                size: object.size(),
                site_fingerprint: object.site_fingerprint(),
                alloc_thread: object.alloc_thread(),
                accesses_by_alloc_thread: object.accesses_by_alloc_thread(),
                accesses_by_others: object.accesses_by_others(),
                invalidations_attributed: object.invalidations_attributed(),
                score: 0,
                top_lines: Vec::new(),
            },
            lines: BoundedPriorityQueue::new(top_lines),
            line_score_total: 0,
        }
    }

    /// Offer one escalated line from the object's footprint.
    pub fn add_line(&mut self, line: &CacheLineRecord) {
        let finding = CacheLineFinding::snapshot(line);
        self.line_score_total += finding.score;
        self.lines.insert(finding.score, finding);
    }

    /// Object score: attributed invalidations scored as first-thread
    /// displacements plus the full score of every line it occupies.
    pub fn score(&self) -> u64 {
        invalidation_score(self.object.invalidations_attributed, 0) + self.line_score_total
    }

    /// True when nothing about this object is worth printing.
    pub fn is_quiet(&self) -> bool {
        self.score() == 0 && self.object.accesses_by_others == 0
    }

    pub fn finish(mut self) -> ObjectDiagnosis {
        self.object.score = self.score();
        self.object.top_lines = self.lines.into_sorted_desc();
        self.object
    }
}
