//! Per-step exchange frames.

use crate::{CodecError, Rank, SpikeRecord, StepIndex};
use std::ops::Range;

/// Records merged from every process for one step.
///
/// Records are ordered by ascending global rank of the contributing
/// process. No ordering by sender id or time is implied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedSpikes {
    records: Vec<SpikeRecord>,
    segments: Vec<Range<usize>>,
}

impl MergedSpikes {
    /// Build from a decoded record array and the per-rank record counts it
    /// was assembled from. The counts must sum to the number of records.
    pub fn from_counts(records: Vec<SpikeRecord>, counts: &[u32]) -> Result<Self, CodecError> {
        let mut segments = Vec::with_capacity(counts.len());
        let mut start = 0usize;
        for &count in counts {
            let end = start + count as usize;
            segments.push(start..end);
            start = end;
        }
        if start != records.len() {
            return Err(CodecError::CountMismatch {
                counted: start,
                decoded: records.len(),
            });
        }
        Ok(Self { records, segments })
    }

    pub fn records(&self) -> &[SpikeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records contributed by one rank.
    pub fn from_rank(&self, rank: Rank) -> &[SpikeRecord] {
        self.segments
            .get(rank.index())
            .map(|range| &self.records[range.clone()])
            .unwrap_or(&[])
    }

    /// Record index range contributed by one rank.
    pub fn segment(&self, rank: Rank) -> Option<Range<usize>> {
        self.segments.get(rank.index()).cloned()
    }
}

/// One iteration of the step loop: what this process emitted and, after the
/// exchange, what every process emitted.
#[derive(Debug, Clone)]
pub struct StepFrame {
    step: StepIndex,
    local: Vec<SpikeRecord>,
    merged: Option<MergedSpikes>,
}

impl StepFrame {
    pub fn new(step: StepIndex, local: Vec<SpikeRecord>) -> Self {
        Self {
            step,
            local,
            merged: None,
        }
    }

    pub fn step(&self) -> StepIndex {
        self.step
    }

    pub fn local(&self) -> &[SpikeRecord] {
        &self.local
    }

    /// Attach the exchange result.
    pub fn complete(&mut self, merged: MergedSpikes) {
        self.merged = Some(merged);
    }

    /// The exchange result, once `complete` was called.
    pub fn merged(&self) -> Option<&MergedSpikes> {
        self.merged.as_ref()
    }
}
