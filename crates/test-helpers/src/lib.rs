//! Test helpers for cosim.
//!
//! Provides a scripted [`LocalSimulator`] double and a runner that starts an
//! in-memory cluster with a color assigned to every rank.

use cosim_core::{CollectiveChannel, EmittedSpike, LocalSimulator};
use cosim_network_memory::{run_cluster, MemoryChannel, MemoryConfig};
use cosim_types::{GroupColor, GroupLayout, HandshakeState, SpikeRecord};
use std::collections::VecDeque;

/// Run `body` on every rank of an in-memory cluster with one rank per entry
/// of `colors`, passing each rank its channel and color.
pub fn run_colored<T, F>(colors: &[GroupColor], config: &MemoryConfig, body: F) -> Vec<T>
where
    T: Send,
    F: Fn(MemoryChannel, GroupColor) -> T + Sync,
{
    run_cluster(colors.len(), config, |channel| {
        let color = colors[channel.rank().index()];
        body(channel, color)
    })
}

/// A simulator that emits a fixed script of spikes and records everything
/// the coordination layer does to it.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSimulator {
    entity_count: u32,
    comm_estimate: f32,
    script: VecDeque<Vec<EmittedSpike>>,
    deliveries: Vec<Vec<SpikeRecord>>,
    advances: Vec<f32>,
    handshake: Option<(GroupLayout, HandshakeState)>,
}

impl ScriptedSimulator {
    pub fn new(entity_count: u32, comm_estimate: f32) -> Self {
        Self {
            entity_count,
            comm_estimate,
            ..Default::default()
        }
    }

    /// Emit `steps[i]` on the i-th drain; later drains are empty.
    pub fn with_script(mut self, steps: Vec<Vec<EmittedSpike>>) -> Self {
        self.script = steps.into();
        self
    }

    /// Every batch handed to `deliver_foreign_spikes`, in call order.
    pub fn deliveries(&self) -> &[Vec<SpikeRecord>] {
        &self.deliveries
    }

    /// Every delta handed to `advance_clock`, in call order.
    pub fn advances(&self) -> &[f32] {
        &self.advances
    }

    /// Sum of all clock advances.
    pub fn clock(&self) -> f32 {
        self.advances.iter().sum()
    }

    /// Layout and parameters received through `on_handshake`.
    pub fn handshake(&self) -> Option<&(GroupLayout, HandshakeState)> {
        self.handshake.as_ref()
    }
}

impl LocalSimulator for ScriptedSimulator {
    fn entity_count(&self) -> u32 {
        self.entity_count
    }

    fn comm_estimate(&self) -> f32 {
        self.comm_estimate
    }

    fn on_handshake(&mut self, layout: &GroupLayout, state: &HandshakeState) {
        self.handshake = Some((layout.clone(), state.clone()));
    }

    fn drain_emitted_spikes(&mut self) -> Vec<EmittedSpike> {
        self.script.pop_front().unwrap_or_default()
    }

    fn deliver_foreign_spikes(&mut self, spikes: &[SpikeRecord]) {
        self.deliveries.push(spikes.to_vec());
    }

    fn advance_clock(&mut self, delta: f32) {
        self.advances.push(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_drains_in_order_then_empties() {
        let mut sim = ScriptedSimulator::new(3, 1.0)
            .with_script(vec![vec![EmittedSpike::new(1, 0.5)], vec![]]);
        assert_eq!(sim.drain_emitted_spikes().len(), 1);
        assert!(sim.drain_emitted_spikes().is_empty());
        assert!(sim.drain_emitted_spikes().is_empty());

        sim.advance_clock(0.5);
        sim.advance_clock(0.25);
        assert_eq!(sim.clock(), 0.75);
    }

    #[test]
    fn test_run_colored_passes_colors() {
        let colors = [GroupColor::Leaf, GroupColor::Host, GroupColor::Host];
        let seen = run_colored(&colors, &MemoryConfig::default(), |_, color| color);
        assert_eq!(seen, colors);
    }

    #[test]
    fn test_run_colored_indexes_colors_by_rank() {
        let colors = [GroupColor::Host, GroupColor::Leaf, GroupColor::Host];
        let seen = run_colored(&colors, &MemoryConfig::default(), |channel, color| {
            (channel.rank(), channel.size(), color)
        });
        for (index, (rank, size, color)) in seen.into_iter().enumerate() {
            assert_eq!(rank.index(), index);
            assert_eq!(size, 3);
            assert_eq!(color, colors[index]);
        }
    }
}
