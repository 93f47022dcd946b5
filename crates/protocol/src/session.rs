//! A whole coordinated run on one process.

use crate::{
    discover, handshake, CoordinationContext, CoordinationError, HandshakeInputs, RunSummary,
    StepReport, StepScheduler,
};
use cosim_core::{CollectiveChannel, LocalSimulator};
use cosim_types::{GroupLayout, HandshakeState};

/// Everything a process learned and did during a run.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub layout: GroupLayout,
    pub handshake: HandshakeState,
    pub summary: RunSummary,
}

/// Discover the topology, negotiate, hand the result to the simulator and
/// run the step loop.
///
/// Collective from start to finish: every process of the job calls this
/// with the same configuration.
pub fn run_session<C, S, F>(
    ctx: &CoordinationContext,
    channel: &mut C,
    simulator: &mut S,
    observer: F,
) -> Result<SessionReport, CoordinationError>
where
    C: CollectiveChannel + ?Sized,
    S: LocalSimulator + ?Sized,
    F: FnMut(&StepReport),
{
    let layout = discover(ctx, channel)?;
    let inputs = HandshakeInputs::from_simulator(&*simulator);
    let state = handshake(ctx, &layout, channel, inputs)?;
    simulator.on_handshake(&layout, &state);

    let summary = StepScheduler::new(ctx, &state).run_with(channel, simulator, observer)?;
    Ok(SessionReport {
        layout,
        handshake: state,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProtocolConfig;
    use cosim_core::EmittedSpike;
    use cosim_network_memory::MemoryConfig;
    use cosim_test_helpers::{run_colored, ScriptedSimulator};
    use cosim_types::{GroupColor, RankLayout};
    use std::time::Duration;

    #[test]
    fn test_session_over_interleaved_layout() {
        let colors = RankLayout::Interleaved.colors(5, 2);
        let config = ProtocolConfig::default()
            .with_total_duration(3.0)
            .with_collective_timeout(Duration::from_secs(10));
        let memory = MemoryConfig {
            timeout: config.collective_timeout(),
        };

        let results = run_colored(&colors, &memory, |mut channel, color| {
            let ctx = CoordinationContext::for_channel(&channel, color, config.clone());
            let mut sim = ScriptedSimulator::new(6, if color.is_host() { 0.5 } else { 1.0 })
                .with_script(vec![vec![EmittedSpike::new(channel.rank().0, 0.1)]; 2]);
            let report = run_session(&ctx, &mut channel, &mut sim, |_| {}).unwrap();
            (report, sim)
        });

        for (report, sim) in results {
            assert_eq!(report.handshake.delta(), 0.5);
            assert_eq!(report.summary.steps, 6);
            // two scripted steps, five ranks each
            assert_eq!(report.summary.records_received, 10);
            assert_eq!(sim.deliveries()[0].len(), 5);
            assert_eq!(sim.clock(), 3.0);
            assert_eq!(report.layout.root_of(GroupColor::Host).0, 1);
        }
    }
}
