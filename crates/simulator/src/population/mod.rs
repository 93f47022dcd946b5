//! Poisson-spiking toy population.
//!
//! Each group owns a contiguous block of global ids: leaf ids start at 0 and
//! host ids start after the leaf group's entity count. Within a group,
//! entity `j` lives on the group member with local rank `j % group_size`.

use crate::config::PopulationConfig;
use cosim_core::{EmittedSpike, LocalSimulator};
use cosim_types::{GroupColor, GroupLayout, HandshakeState, SpikeRecord};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::ops::Range;
use tracing::debug;

/// An entity owned by this rank and the time of its next spike.
#[derive(Debug, Clone, Copy)]
struct Entity {
    id: u32,
    next_spike: f64,
}

/// A population of independent Poisson spike sources.
///
/// Spikes emitted while the clock advances over `[t, t + delta)` are
/// returned by the next drain. Delivered records are counted, split into
/// own-group and foreign senders.
#[derive(Debug)]
pub struct PoissonPopulation {
    color: GroupColor,
    config: PopulationConfig,
    rng: ChaCha8Rng,
    clock: f64,
    entities: Vec<Entity>,
    own_ids: Range<u32>,
    pending: Vec<EmittedSpike>,
    emitted: u64,
    own_received: u64,
    foreign_received: u64,
}

impl PoissonPopulation {
    /// Entities are assigned in `on_handshake`, once the group layout and
    /// the leaf entity count are known.
    pub fn new(color: GroupColor, config: PopulationConfig, seed: u64) -> Self {
        Self {
            color,
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            clock: 0.0,
            entities: Vec::new(),
            own_ids: 0..0,
            pending: Vec::new(),
            emitted: 0,
            own_received: 0,
            foreign_received: 0,
        }
    }

    pub fn color(&self) -> GroupColor {
        self.color
    }

    /// Global ids of the entities on this rank.
    pub fn owned_ids(&self) -> Vec<u32> {
        self.entities.iter().map(|e| e.id).collect()
    }

    /// Global id range of this rank's whole group.
    pub fn group_ids(&self) -> Range<u32> {
        self.own_ids.clone()
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// Spikes emitted by this rank so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Delivered records sent by this rank's own group.
    pub fn own_received(&self) -> u64 {
        self.own_received
    }

    /// Delivered records sent by the peer group.
    pub fn foreign_received(&self) -> u64 {
        self.foreign_received
    }

    fn interval(&mut self) -> f64 {
        if self.config.rate <= 0.0 {
            return f64::INFINITY;
        }
        // 1 - u lies in (0, 1], so the log is finite
        let u: f64 = self.rng.gen();
        -(1.0 - u).ln() / self.config.rate
    }
}

impl LocalSimulator for PoissonPopulation {
    fn entity_count(&self) -> u32 {
        self.config.entities
    }

    fn comm_estimate(&self) -> f32 {
        self.config.comm_estimate()
    }

    fn on_handshake(&mut self, layout: &GroupLayout, state: &HandshakeState) {
        let offset = state.id_offset(self.color);
        let count = state.entity_count(self.color);
        let group = layout.own_group();
        self.own_ids = offset..offset + count;

        let (local_rank, group_size) = (group.local_rank() as u32, group.size() as u32);
        let ids: Vec<u32> = (0..count)
            .filter(|j| j % group_size == local_rank)
            .map(|j| offset + j)
            .collect();
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            let next_spike = self.interval();
            entities.push(Entity { id, next_spike });
        }
        self.entities = entities;

        debug!(
            color = %self.color,
            owned = self.entities.len(),
            first_id = offset,
            group_entities = count,
            "Population assigned"
        );
    }

    fn drain_emitted_spikes(&mut self) -> Vec<EmittedSpike> {
        std::mem::take(&mut self.pending)
    }

    fn deliver_foreign_spikes(&mut self, spikes: &[SpikeRecord]) {
        for spike in spikes {
            if self.own_ids.contains(&spike.sender_id()) {
                self.own_received += 1;
            } else {
                self.foreign_received += 1;
            }
        }
    }

    fn advance_clock(&mut self, delta: f32) {
        let end = self.clock + f64::from(delta);
        for index in 0..self.entities.len() {
            while self.entities[index].next_spike < end {
                let entity = self.entities[index];
                self.pending
                    .push(EmittedSpike::new(entity.id, entity.next_spike as f32));
                self.emitted += 1;
                let interval = self.interval();
                self.entities[index].next_spike += interval;
            }
        }
        self.clock = end;
    }
}
