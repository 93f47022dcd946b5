//! Per-step spike exchange.
//!
//! Two collectives per call: a count exchange so every process can size its
//! receive buffer, then a variable byte exchange carrying the encoded
//! records. Every process ends up with the same merged array, ordered by
//! contributing rank.

use crate::{CoordinationContext, CoordinationError};
use cosim_core::CollectiveChannel;
use cosim_types::{
    decode_records, encode_records, record_count, MergedSpikes, SpikeRecord, RECORD_SIZE,
};
use tracing::debug;

/// Receive layout of one exchange, derived from the per-rank record counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangePlan {
    counts: Vec<u32>,
    byte_counts: Vec<usize>,
    displacements: Vec<usize>,
    total_bytes: usize,
}

impl ExchangePlan {
    /// Byte counts are `count * RECORD_SIZE`; displacements are their
    /// exclusive prefix sums.
    pub fn from_counts(counts: Vec<u32>) -> Self {
        let byte_counts: Vec<usize> = counts
            .iter()
            .map(|&count| count as usize * RECORD_SIZE)
            .collect();
        let mut displacements = Vec::with_capacity(byte_counts.len());
        let mut total_bytes = 0usize;
        for &len in &byte_counts {
            displacements.push(total_bytes);
            total_bytes += len;
        }
        Self {
            counts,
            byte_counts,
            displacements,
            total_bytes,
        }
    }

    /// Record count announced by each rank.
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn byte_counts(&self) -> &[usize] {
        &self.byte_counts
    }

    pub fn displacements(&self) -> &[usize] {
        &self.displacements
    }

    pub fn total_records(&self) -> usize {
        self.total_bytes / RECORD_SIZE
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

/// Merge every process's records into one array visible to all.
///
/// Collective: every process calls this once per step, even with no
/// records.
pub fn exchange_spikes<C: CollectiveChannel + ?Sized>(
    ctx: &CoordinationContext,
    channel: &mut C,
    local: &[SpikeRecord],
) -> Result<MergedSpikes, CoordinationError> {
    let _guard = ctx.span().enter();

    let count = record_count(local)?;
    let plan = ExchangePlan::from_counts(channel.exchange_counts(count)?);

    let send = encode_records(local);
    let mut recv = vec![0u8; plan.total_bytes()];
    channel.exchange_variable_bytes(&send, plan.byte_counts(), plan.displacements(), &mut recv)?;

    let records = decode_records(&recv)?;
    debug!(local = count, merged = records.len(), "Spikes exchanged");
    Ok(MergedSpikes::from_counts(records, plan.counts())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProtocolConfig;
    use cosim_network_memory::{run_cluster, MemoryConfig};
    use cosim_types::{GroupColor, Rank};

    fn records_of(rank: usize) -> Vec<SpikeRecord> {
        // rank r contributes r records with distinct senders and times
        (0..rank)
            .map(|i| {
                SpikeRecord::new((rank * 100 + i) as u32, i as u32, rank as f32 + 0.25)
            })
            .collect()
    }

    fn exchange_on_all<F>(size: usize, local: F, calls: usize) -> Vec<Vec<MergedSpikes>>
    where
        F: Fn(Rank) -> Vec<SpikeRecord> + Sync,
    {
        run_cluster(size, &MemoryConfig::default(), |mut channel| {
            let color = GroupColor::from_flag(channel.rank().0 % 2 == 1);
            let ctx = CoordinationContext::for_channel(&channel, color, ProtocolConfig::default());
            let mine = local(channel.rank());
            (0..calls)
                .map(|_| exchange_spikes(&ctx, &mut channel, &mine).unwrap())
                .collect()
        })
    }

    #[test]
    fn test_plan_prefix_sums() {
        let plan = ExchangePlan::from_counts(vec![2, 0, 1, 3]);
        assert_eq!(plan.byte_counts(), &[24, 0, 12, 36]);
        assert_eq!(plan.displacements(), &[0, 24, 24, 36]);
        assert_eq!(plan.total_bytes(), 72);
        assert_eq!(plan.total_records(), 6);
    }

    #[test]
    fn test_merged_length_and_segments() {
        let size = 4;
        let results = exchange_on_all(size, |rank| records_of(rank.index()), 1);
        let expected_total: usize = (0..size).sum();

        for per_rank in results {
            let merged = &per_rank[0];
            assert_eq!(merged.len(), expected_total);
            for rank in 0..size {
                let sent = encode_records(&records_of(rank));
                let received = encode_records(merged.from_rank(Rank::from(rank)));
                assert_eq!(sent, received);
            }
        }
    }

    #[test]
    fn test_one_sided_exchange() {
        let results = exchange_on_all(
            2,
            |rank| {
                if rank == Rank(0) {
                    vec![SpikeRecord::new(5, 0, 12.3)]
                } else {
                    Vec::new()
                }
            },
            1,
        );
        for per_rank in results {
            assert_eq!(per_rank[0].records(), &[SpikeRecord::new(5, 0, 12.3)]);
        }
    }

    #[test]
    fn test_consecutive_empty_exchanges() {
        let results = exchange_on_all(3, |_| Vec::new(), 2);
        for per_rank in results {
            assert_eq!(per_rank.len(), 2);
            assert!(per_rank.iter().all(MergedSpikes::is_empty));
        }
    }

    #[test]
    fn test_auxiliary_word_survives() {
        let results = exchange_on_all(
            2,
            |rank| vec![SpikeRecord::new(rank.0, 0xdead_beef, 1.0)],
            1,
        );
        for per_rank in results {
            let aux: Vec<u32> = per_rank[0]
                .records()
                .iter()
                .map(|r| r.auxiliary_id())
                .collect();
            assert_eq!(aux, vec![0xdead_beef, 0xdead_beef]);
        }
    }
}
