//! One-time negotiation of run parameters.
//!
//! Every process issues the same broadcasts in the same order:
//!
//! | Phase | Root(s)      | Scalar | Meaning                              |
//! |-------|--------------|--------|--------------------------------------|
//! | 0     | leaf, host   | `u32`  | spike record layout tag (optional)   |
//! | 1     | leaf, host   | `i32`  | entity count of the root's group     |
//! | 2     | leaf, host   | `f32`  | communication estimate               |
//! | 3     | leaf         | `i32`  | step count                           |
//!
//! A root that cannot produce a valid value still broadcasts a sentinel so
//! the call sequence stays intact. Validation happens on every process after
//! each phase, so all processes fail at the same point.

use crate::{CoordinationContext, CoordinationError, HandshakeError};
use cosim_core::{CollectiveChannel, LocalSimulator, ScalarBroadcast};
use cosim_types::{GroupColor, GroupLayout, HandshakeState, PerGroup, RECORD_LAYOUT_TAG};
use tracing::{debug, info, warn};

/// Sentinel broadcast by a root whose value cannot be represented.
const INVALID: i32 = -1;

/// What this process contributes to the handshake.
///
/// Only group roots' values are broadcast; other processes' inputs are
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandshakeInputs {
    pub entity_count: u32,
    pub comm_estimate: f32,
}

impl HandshakeInputs {
    pub fn new(entity_count: u32, comm_estimate: f32) -> Self {
        Self {
            entity_count,
            comm_estimate,
        }
    }

    pub fn from_simulator<S: LocalSimulator + ?Sized>(simulator: &S) -> Self {
        Self::new(simulator.entity_count(), simulator.comm_estimate())
    }
}

/// Run the handshake and return the agreed parameters.
///
/// Collective: every process calls this once, after [`discover`](crate::discover),
/// with the same configuration.
pub fn handshake<C: CollectiveChannel + ?Sized>(
    ctx: &CoordinationContext,
    layout: &GroupLayout,
    channel: &mut C,
    inputs: HandshakeInputs,
) -> Result<HandshakeState, CoordinationError> {
    let _guard = ctx.span().enter();

    if ctx.config().verify_record_layout {
        let tags = broadcast_per_group(layout, channel, RECORD_LAYOUT_TAG)?;
        for color in GroupColor::ALL {
            let theirs = tags.get(color);
            if theirs != RECORD_LAYOUT_TAG {
                warn!(%color, theirs, "Spike record layout mismatch");
                return Err(HandshakeError::LayoutMismatch {
                    color,
                    theirs,
                    ours: RECORD_LAYOUT_TAG,
                }
                .into());
            }
        }
    }

    // Phase 1: entity counts.
    let own_count = i32::try_from(inputs.entity_count).unwrap_or(INVALID);
    let raw_counts = broadcast_per_group(layout, channel, own_count)?;
    let mut counts = [0u32; 2];
    for (slot, color) in counts.iter_mut().zip(GroupColor::ALL) {
        let value = raw_counts.get(color);
        *slot = u32::try_from(value)
            .map_err(|_| HandshakeError::InvalidEntityCount { color, value })?;
    }
    let entity_counts = PerGroup::new(counts[0], counts[1]);
    debug!(
        leaf = entity_counts.leaf,
        host = entity_counts.host,
        "Entity counts exchanged"
    );

    // Phase 2: communication estimates.
    let comm_estimates = broadcast_per_group(layout, channel, inputs.comm_estimate)?;
    for color in GroupColor::ALL {
        let value = comm_estimates.get(color);
        if !(value.is_finite() && value > 0.0) {
            return Err(HandshakeError::InvalidCommEstimate { color, value }.into());
        }
    }
    let delta = comm_estimates.leaf.min(comm_estimates.host);

    // Phase 3: step count, computed by the leaf root only.
    let leaf_root = layout.root_of(GroupColor::Leaf);
    let (announced, local_error) = if layout.rank() == leaf_root {
        match compute_step_count(ctx.config().total_duration, delta) {
            Ok(steps) => (steps as i32, None),
            Err(e) => (INVALID, Some(e)),
        }
    } else {
        (0, None)
    };
    let received = channel.broadcast_scalar(leaf_root, announced)?;
    if let Some(e) = local_error {
        return Err(e.into());
    }
    let step_count =
        u32::try_from(received).map_err(|_| HandshakeError::InvalidStepCount(received))?;

    let state = HandshakeState::new(ctx.color(), entity_counts, comm_estimates, step_count);
    info!(
        own_entities = state.own_entity_count(),
        peer_entities = state.peer_entity_count(),
        delta = state.delta(),
        min_delay = state.min_delay(),
        step_count = state.step_count(),
        "Handshake complete"
    );
    Ok(state)
}

/// Broadcast `value` from the leaf root, then from the host root.
fn broadcast_per_group<C, T>(
    layout: &GroupLayout,
    channel: &mut C,
    value: T,
) -> Result<PerGroup<T>, CoordinationError>
where
    C: CollectiveChannel + ?Sized,
    T: cosim_core::WireScalar,
{
    let leaf = channel.broadcast_scalar(layout.root_of(GroupColor::Leaf), value)?;
    let host = channel.broadcast_scalar(layout.root_of(GroupColor::Host), value)?;
    Ok(PerGroup::new(leaf, host))
}

/// Number of steps of length `delta` needed to cover `total_duration`.
///
/// `ceil(total_duration / delta)`, plus one if rounding left the product
/// short of the duration. The result must fit the signed 32-bit wire value.
pub fn compute_step_count(total_duration: f64, delta: f32) -> Result<u32, HandshakeError> {
    if !total_duration.is_finite() || total_duration < 0.0 {
        return Err(HandshakeError::InvalidDuration(total_duration));
    }
    let delta_wide = f64::from(delta);
    let mut steps = (total_duration / delta_wide).ceil();
    if steps * delta_wide < total_duration {
        steps += 1.0;
    }
    if !steps.is_finite() || steps > f64::from(i32::MAX) {
        return Err(HandshakeError::StepCountOverflow {
            total_duration,
            delta,
        });
    }
    Ok(steps as u32)
}
