//! Run parameters agreed during the handshake.

use crate::GroupColor;

/// A value known for both groups, indexed by color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerGroup<T> {
    pub leaf: T,
    pub host: T,
}

impl<T: Copy> PerGroup<T> {
    pub fn new(leaf: T, host: T) -> Self {
        Self { leaf, host }
    }

    pub fn get(&self, color: GroupColor) -> T {
        match color {
            GroupColor::Leaf => self.leaf,
            GroupColor::Host => self.host,
        }
    }
}

/// Parameters shared by every process once the handshake completes.
///
/// Built once at startup and read-only afterwards. Every process holds an
/// identical copy apart from `own_color`.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeState {
    own_color: GroupColor,
    entity_counts: PerGroup<u32>,
    comm_estimates: PerGroup<f32>,
    step_count: u32,
}

impl HandshakeState {
    pub fn new(
        own_color: GroupColor,
        entity_counts: PerGroup<u32>,
        comm_estimates: PerGroup<f32>,
        step_count: u32,
    ) -> Self {
        Self {
            own_color,
            entity_counts,
            comm_estimates,
            step_count,
        }
    }

    pub fn own_color(&self) -> GroupColor {
        self.own_color
    }

    pub fn own_entity_count(&self) -> u32 {
        self.entity_counts.get(self.own_color)
    }

    pub fn peer_entity_count(&self) -> u32 {
        self.entity_counts.get(self.own_color.peer())
    }

    pub fn entity_count(&self, color: GroupColor) -> u32 {
        self.entity_counts.get(color)
    }

    pub fn own_comm_estimate(&self) -> f32 {
        self.comm_estimates.get(self.own_color)
    }

    pub fn peer_comm_estimate(&self) -> f32 {
        self.comm_estimates.get(self.own_color.peer())
    }

    /// Communication interval: the smaller of the two estimates.
    pub fn delta(&self) -> f32 {
        self.comm_estimates.leaf.min(self.comm_estimates.host)
    }

    /// Minimum delay between the groups, twice `delta`.
    pub fn min_delay(&self) -> f32 {
        2.0 * self.delta()
    }

    /// Number of coordinated steps in the run.
    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    /// First global entity id owned by a group.
    ///
    /// Leaf entities come first; host ids are offset by the leaf count.
    pub fn id_offset(&self, color: GroupColor) -> u32 {
        match color {
            GroupColor::Leaf => 0,
            GroupColor::Host => self.entity_counts.leaf,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_and_min_delay() {
        let state = HandshakeState::new(
            GroupColor::Leaf,
            PerGroup::new(100, 40),
            PerGroup::new(5.0, 7.0),
            10,
        );
        assert_eq!(state.delta(), 5.0);
        assert_eq!(state.min_delay(), 10.0);
        assert_eq!(state.own_entity_count(), 100);
        assert_eq!(state.peer_entity_count(), 40);
        assert_eq!(state.own_comm_estimate(), 5.0);
        assert_eq!(state.peer_comm_estimate(), 7.0);
    }

    #[test]
    fn test_views_from_host_side() {
        let state = HandshakeState::new(
            GroupColor::Host,
            PerGroup::new(100, 40),
            PerGroup::new(5.0, 7.0),
            10,
        );
        assert_eq!(state.own_entity_count(), 40);
        assert_eq!(state.peer_entity_count(), 100);
        assert_eq!(state.delta(), 5.0);
        assert_eq!(state.id_offset(GroupColor::Host), 100);
        assert_eq!(state.id_offset(GroupColor::Leaf), 0);
    }
}
