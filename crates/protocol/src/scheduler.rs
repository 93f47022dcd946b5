//! The coordinated step loop.

use crate::{exchange_spikes, CoordinationContext, CoordinationError};
use cosim_core::{CollectiveChannel, EmittedSpike, LocalSimulator};
use cosim_types::{HandshakeState, StepFrame, StepIndex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What happened during one iteration, handed to the observer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub step: StepIndex,
    /// Records this process contributed.
    pub local_records: usize,
    /// Records in the merged array, this process's included.
    pub merged_records: usize,
    /// Wall time spent inside the exchange collectives.
    pub exchange_time: Duration,
    /// The trailing flush iteration, which does not advance the clock.
    pub flush: bool,
}

/// Totals for a finished run on one process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Iterations that advanced the clock.
    pub steps: u64,
    pub flushed: bool,
    pub records_sent: u64,
    /// Merged records delivered to the simulator, own records included.
    pub records_received: u64,
}

/// Drives the local simulator for the agreed number of steps, exchanging
/// spikes once per step.
///
/// Each step drains the simulator, exchanges, delivers the full merged array
/// and advances the clock by `delta`. The collectives inside the exchange are
/// the only synchronization points.
pub struct StepScheduler<'a> {
    ctx: &'a CoordinationContext,
    state: &'a HandshakeState,
}

impl<'a> StepScheduler<'a> {
    pub fn new(ctx: &'a CoordinationContext, state: &'a HandshakeState) -> Self {
        Self { ctx, state }
    }

    /// Run the loop without observing individual steps.
    pub fn run<C, S>(
        &self,
        channel: &mut C,
        simulator: &mut S,
    ) -> Result<RunSummary, CoordinationError>
    where
        C: CollectiveChannel + ?Sized,
        S: LocalSimulator + ?Sized,
    {
        self.run_with(channel, simulator, |_| {})
    }

    /// Run the loop, calling `observer` after every iteration.
    pub fn run_with<C, S, F>(
        &self,
        channel: &mut C,
        simulator: &mut S,
        mut observer: F,
    ) -> Result<RunSummary, CoordinationError>
    where
        C: CollectiveChannel + ?Sized,
        S: LocalSimulator + ?Sized,
        F: FnMut(&StepReport),
    {
        let steps = u64::from(self.state.step_count());
        let flush = self.ctx.config().flush_final_exchange;
        self.ctx.span().in_scope(|| {
            info!(
                steps,
                delta = self.state.delta(),
                flush,
                "Starting step loop"
            )
        });

        let mut summary = RunSummary::default();
        let mut step = StepIndex::FIRST;
        while step.0 < steps {
            let report = self.iterate(channel, simulator, step, false)?;
            summary.steps += 1;
            summary.records_sent += report.local_records as u64;
            summary.records_received += report.merged_records as u64;
            observer(&report);
            step = step.next();
        }

        if flush {
            let report = self.iterate(channel, simulator, step, true)?;
            summary.flushed = true;
            summary.records_sent += report.local_records as u64;
            summary.records_received += report.merged_records as u64;
            observer(&report);
        }

        self.ctx.span().in_scope(|| {
            info!(
                steps = summary.steps,
                sent = summary.records_sent,
                received = summary.records_received,
                "Step loop finished"
            )
        });
        Ok(summary)
    }

    fn iterate<C, S>(
        &self,
        channel: &mut C,
        simulator: &mut S,
        step: StepIndex,
        flush: bool,
    ) -> Result<StepReport, CoordinationError>
    where
        C: CollectiveChannel + ?Sized,
        S: LocalSimulator + ?Sized,
    {
        let local = simulator
            .drain_emitted_spikes()
            .into_iter()
            .map(EmittedSpike::into_record)
            .collect();
        let mut frame = StepFrame::new(step, local);

        let started = Instant::now();
        let merged = exchange_spikes(self.ctx, channel, frame.local())?;
        let exchange_time = started.elapsed();

        simulator.deliver_foreign_spikes(merged.records());
        let merged_records = merged.len();
        frame.complete(merged);
        if !flush {
            simulator.advance_clock(self.state.delta());
        }

        let report = StepReport {
            step: frame.step(),
            local_records: frame.local().len(),
            merged_records,
            exchange_time,
            flush,
        };
        self.ctx.span().in_scope(|| {
            debug!(
                step = %report.step,
                local = report.local_records,
                merged = report.merged_records,
                flush,
                "Step complete"
            )
        });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{discover, handshake, HandshakeInputs, ProtocolConfig};
    use cosim_network_memory::MemoryConfig;
    use cosim_test_helpers::{run_colored, ScriptedSimulator};
    use cosim_types::{GroupColor, RankLayout, SpikeRecord};
    use tracing_test::traced_test;

    /// Run discover, handshake and the step loop on every rank and return
    /// each rank's simulator, summary and observed reports.
    fn run_all(
        colors: &[GroupColor],
        config: ProtocolConfig,
        script: impl Fn(GroupColor) -> ScriptedSimulator + Sync,
    ) -> Vec<(ScriptedSimulator, RunSummary, Vec<StepReport>)> {
        run_colored(colors, &MemoryConfig::default(), |mut channel, color| {
            let ctx = CoordinationContext::for_channel(&channel, color, config.clone());
            let mut sim = script(color);
            let layout = discover(&ctx, &mut channel).unwrap();
            let state = handshake(
                &ctx,
                &layout,
                &mut channel,
                HandshakeInputs::from_simulator(&sim),
            )
            .unwrap();
            sim.on_handshake(&layout, &state);

            let mut reports = Vec::new();
            let summary = StepScheduler::new(&ctx, &state)
                .run_with(&mut channel, &mut sim, |report| reports.push(*report))
                .unwrap();
            (sim, summary, reports)
        })
    }

    #[traced_test]
    #[test]
    fn test_loop_runs_agreed_steps_and_flushes() {
        let colors = RankLayout::Prefix.colors(2, 1);
        let config = ProtocolConfig::default().with_total_duration(97.0);
        let results = run_all(&colors, config, |_| ScriptedSimulator::new(4, 10.0));

        for (sim, summary, reports) in results {
            assert_eq!(summary.steps, 10);
            assert!(summary.flushed);
            assert_eq!(reports.len(), 11);
            assert!(reports.last().unwrap().flush);
            assert_eq!(sim.advances(), &[10.0; 10]);
            assert_eq!(sim.deliveries().len(), 11);
            assert_eq!(sim.clock(), 100.0);
        }
    }

    #[test]
    fn test_spikes_delivered_to_both_groups() {
        let colors = RankLayout::Prefix.colors(2, 1);
        let config = ProtocolConfig::default()
            .with_total_duration(2.0)
            .with_final_flush(false);
        let results = run_all(&colors, config, |color| match color {
            GroupColor::Leaf => ScriptedSimulator::new(1, 1.0)
                .with_script(vec![vec![EmittedSpike::new(5, 12.3)], vec![]]),
            GroupColor::Host => ScriptedSimulator::new(1, 1.0),
        });

        for (sim, summary, reports) in results {
            assert_eq!(summary.steps, 2);
            assert!(!summary.flushed);
            assert_eq!(summary.records_received, 1);
            assert_eq!(sim.deliveries()[0], vec![SpikeRecord::new(5, 0, 12.3)]);
            assert!(sim.deliveries()[1].is_empty());
            assert_eq!(reports[0].merged_records, 1);
        }
    }

    #[test]
    fn test_zero_steps_still_flushes() {
        let colors = RankLayout::Interleaved.colors(3, 2);
        let config = ProtocolConfig::default().with_total_duration(0.0);
        let results = run_all(&colors, config, |_| {
            ScriptedSimulator::new(2, 0.5).with_script(vec![vec![EmittedSpike::new(1, 0.0)]])
        });

        for (sim, summary, reports) in results {
            assert_eq!(summary.steps, 0);
            assert!(summary.flushed);
            assert_eq!(summary.records_sent, 1);
            assert_eq!(summary.records_received, 3);
            assert!(sim.advances().is_empty());
            assert_eq!(reports.len(), 1);
        }
    }

    #[test]
    fn test_simulator_sees_handshake() {
        let colors = RankLayout::Suffix.colors(3, 1);
        let results = run_all(&colors, ProtocolConfig::default(), |color| {
            ScriptedSimulator::new(if color.is_host() { 30 } else { 10 }, 1.0)
        });
        for (sim, _, _) in results {
            let (layout, state) = sim.handshake().unwrap();
            assert_eq!(state.entity_count(GroupColor::Leaf), 10);
            assert_eq!(state.id_offset(GroupColor::Host), 10);
            assert_eq!(layout.root_of(GroupColor::Host), cosim_types::Rank(0));
        }
    }
}
