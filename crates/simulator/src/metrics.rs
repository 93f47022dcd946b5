//! Per-rank run metrics.

use cosim_protocol::{RunSummary, StepReport};
use cosim_types::{GroupColor, GroupView, Rank};
use hdrhistogram::Histogram;
use std::fmt;
use std::time::Duration;

/// Collects exchange latencies as the step loop reports them.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// Exchange wall time per step, in microseconds.
    exchange_latency: Histogram<u64>,
    busiest_step: usize,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            // three significant figures, auto-resizing
            exchange_latency: Histogram::new(3).expect("histogram creation should succeed"),
            busiest_step: 0,
        }
    }

    /// Record one step. Meant to be passed as the scheduler's observer.
    pub fn observe(&mut self, report: &StepReport) {
        let micros = report.exchange_time.as_micros().min(u128::from(u64::MAX)) as u64;
        // auto-resizing histograms accept any value
        let _ = self.exchange_latency.record(micros);
        self.busiest_step = self.busiest_step.max(report.merged_records);
    }

    pub fn steps_observed(&self) -> u64 {
        self.exchange_latency.len()
    }

    pub fn finish(
        self,
        rank: Rank,
        group: &GroupView,
        summary: RunSummary,
        foreign_received: u64,
    ) -> RankReport {
        let quantile = |q| Duration::from_micros(self.exchange_latency.value_at_quantile(q));
        RankReport {
            rank,
            color: group.color(),
            group: group.clone(),
            summary,
            foreign_received,
            busiest_step: self.busiest_step,
            p50_exchange: quantile(0.50),
            p99_exchange: quantile(0.99),
            max_exchange: Duration::from_micros(self.exchange_latency.max()),
        }
    }
}

/// What one rank reports at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RankReport {
    pub rank: Rank,
    pub color: GroupColor,
    /// The own group, as rank discovery found it.
    pub group: GroupView,
    pub summary: RunSummary,
    /// Delivered records that came from the peer group.
    pub foreign_received: u64,
    /// Largest merged array seen in one step.
    pub busiest_step: usize,
    pub p50_exchange: Duration,
    pub p99_exchange: Duration,
    pub max_exchange: Duration,
}

impl fmt::Display for RankReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} {}/{}] steps={} flushed={} sent={} received={} foreign={} busiest={} \
             exchange p50={:?} p99={:?} max={:?}",
            self.rank,
            self.color,
            self.group.local_rank(),
            self.group.size(),
            self.summary.steps,
            self.summary.flushed,
            self.summary.records_sent,
            self.summary.records_received,
            self.foreign_received,
            self.busiest_step,
            self.p50_exchange,
            self.p99_exchange,
            self.max_exchange
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosim_types::StepIndex;

    fn report(micros: u64, merged: usize) -> StepReport {
        StepReport {
            step: StepIndex(0),
            local_records: 0,
            merged_records: merged,
            exchange_time: Duration::from_micros(micros),
            flush: false,
        }
    }

    #[test]
    fn test_percentiles_and_busiest_step() {
        let mut metrics = MetricsCollector::new();
        for micros in 1..=100 {
            metrics.observe(&report(micros, micros as usize % 7));
        }
        assert_eq!(metrics.steps_observed(), 100);

        let group = GroupView::new(GroupColor::Host, Rank(1), vec![Rank(0), Rank(1)]).unwrap();
        let report = metrics.finish(Rank(1), &group, RunSummary::default(), 3);
        assert_eq!(report.p50_exchange, Duration::from_micros(50));
        assert_eq!(report.max_exchange, Duration::from_micros(100));
        assert_eq!(report.busiest_step, 6);
        assert!(report.to_string().contains("Rank(1) [host 1/2]"));
    }

    #[test]
    fn test_empty_run_reports_zeros() {
        let group = GroupView::new(GroupColor::Leaf, Rank(0), vec![Rank(0)]).unwrap();
        let report = MetricsCollector::new().finish(Rank(0), &group, RunSummary::default(), 0);
        assert_eq!(report.p99_exchange, Duration::ZERO);
        assert_eq!(report.busiest_step, 0);
    }
}
