//! Core traits for the coordination layer.

use crate::CollectiveError;
use cosim_types::{GroupLayout, HandshakeState, Rank, SpikeRecord};

/// A blocking collective transport spanning every process of the job.
///
/// This is the only way processes talk to each other. Every method is a
/// collective: it returns only once every rank has issued the matching call,
/// and all ranks must issue calls in the same order. A rank that skips or
/// repeats a call hangs the job, or fails with an error on transports with a
/// timeout.
///
/// # Implementations
///
/// - `cosim-network-memory`: one thread per rank inside a single process
/// - `cosim-network-tcp`: one OS process per rank over TCP
pub trait CollectiveChannel {
    /// Global rank of the calling process.
    fn rank(&self) -> Rank;

    /// Number of processes in the job.
    fn size(&self) -> usize;

    /// Copy `buf` from `root` to every rank.
    ///
    /// Every rank passes a buffer of the same length. On the root the buffer
    /// is read; elsewhere it is overwritten.
    fn broadcast(&mut self, root: Rank, buf: &mut [u8]) -> Result<(), CollectiveError>;

    /// Gather one count from every rank, indexed by rank.
    fn exchange_counts(&mut self, local: u32) -> Result<Vec<u32>, CollectiveError>;

    /// Gather a variable-length block from every rank into `recv`.
    ///
    /// Rank `r`'s block lands at `recv[recv_displs[r]..recv_displs[r] + recv_counts[r]]`.
    /// `send` must be exactly `recv_counts[self.rank()]` bytes long. A rank
    /// with nothing to send still calls this with an empty `send`.
    fn exchange_variable_bytes(
        &mut self,
        send: &[u8],
        recv_counts: &[usize],
        recv_displs: &[usize],
        recv: &mut [u8],
    ) -> Result<(), CollectiveError>;
}

impl<C: CollectiveChannel + ?Sized> CollectiveChannel for &mut C {
    fn rank(&self) -> Rank {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn broadcast(&mut self, root: Rank, buf: &mut [u8]) -> Result<(), CollectiveError> {
        (**self).broadcast(root, buf)
    }

    fn exchange_counts(&mut self, local: u32) -> Result<Vec<u32>, CollectiveError> {
        (**self).exchange_counts(local)
    }

    fn exchange_variable_bytes(
        &mut self,
        send: &[u8],
        recv_counts: &[usize],
        recv_displs: &[usize],
        recv: &mut [u8],
    ) -> Result<(), CollectiveError> {
        (**self).exchange_variable_bytes(send, recv_counts, recv_displs, recv)
    }
}

impl<C: CollectiveChannel + ?Sized> CollectiveChannel for Box<C> {
    fn rank(&self) -> Rank {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn broadcast(&mut self, root: Rank, buf: &mut [u8]) -> Result<(), CollectiveError> {
        (**self).broadcast(root, buf)
    }

    fn exchange_counts(&mut self, local: u32) -> Result<Vec<u32>, CollectiveError> {
        (**self).exchange_counts(local)
    }

    fn exchange_variable_bytes(
        &mut self,
        send: &[u8],
        recv_counts: &[usize],
        recv_displs: &[usize],
        recv: &mut [u8],
    ) -> Result<(), CollectiveError> {
        (**self).exchange_variable_bytes(send, recv_counts, recv_displs, recv)
    }
}

/// Check that a variable exchange layout fits the job and the receive buffer.
///
/// Transports call this before moving any bytes so that a bad layout fails
/// locally instead of corrupting a peer's segment.
pub fn validate_exchange_layout(
    rank: Rank,
    size: usize,
    send_len: usize,
    recv_counts: &[usize],
    recv_displs: &[usize],
    recv_len: usize,
) -> Result<(), CollectiveError> {
    if recv_counts.len() != size || recv_displs.len() != size {
        return Err(CollectiveError::InvalidLayout(format!(
            "expected {} counts and offsets, got {} and {}",
            size,
            recv_counts.len(),
            recv_displs.len()
        )));
    }
    if recv_counts[rank.index()] != send_len {
        return Err(CollectiveError::InvalidLayout(format!(
            "{} sends {} bytes but its receive slot holds {}",
            rank,
            send_len,
            recv_counts[rank.index()]
        )));
    }
    for (index, (&count, &displ)) in recv_counts.iter().zip(recv_displs).enumerate() {
        if displ.checked_add(count).map_or(true, |end| end > recv_len) {
            return Err(CollectiveError::InvalidLayout(format!(
                "segment of {} ({} bytes at {}) overruns a {}-byte buffer",
                Rank::from(index),
                count,
                displ,
                recv_len
            )));
        }
    }
    Ok(())
}

/// A spike emitted by the local simulator, before packing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmittedSpike {
    /// Global id of the emitting entity.
    pub id: u32,
    /// Emission time in simulation time units.
    pub time: f32,
}

impl EmittedSpike {
    pub fn new(id: u32, time: f32) -> Self {
        Self { id, time }
    }

    /// Pack as a wire record with the reserved word zeroed.
    pub fn into_record(self) -> SpikeRecord {
        SpikeRecord::emitted(self.id, self.time)
    }
}

/// The boundary with a black-box simulator running inside one process.
///
/// The coordination layer never looks inside the simulator: it pulls what
/// was emitted, pushes what arrived, and moves the clock.
pub trait LocalSimulator {
    /// Number of entities owned by this simulator's group.
    ///
    /// Only the group root's answer is broadcast during the handshake.
    fn entity_count(&self) -> u32;

    /// Half of the smallest delay this group can tolerate between exchanges.
    ///
    /// Only the group root's answer is broadcast during the handshake.
    fn comm_estimate(&self) -> f32;

    /// Called once with the discovered layout and the agreed run parameters,
    /// before the first step.
    fn on_handshake(&mut self, _layout: &GroupLayout, _state: &HandshakeState) {}

    /// Return and forget every spike emitted since the previous call.
    fn drain_emitted_spikes(&mut self) -> Vec<EmittedSpike>;

    /// Hand over the records merged from every process this step.
    fn deliver_foreign_spikes(&mut self, spikes: &[SpikeRecord]);

    /// Advance the local clock by `delta` simulation time units.
    fn advance_clock(&mut self, delta: f32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_accepts_prefix_sums() {
        let counts = [12, 0, 24];
        let displs = [0, 12, 12];
        assert!(validate_exchange_layout(Rank(1), 3, 0, &counts, &displs, 36).is_ok());
    }

    #[test]
    fn test_layout_rejects_wrong_send_length() {
        let result = validate_exchange_layout(Rank(0), 2, 12, &[24, 0], &[0, 24], 24);
        assert!(matches!(result, Err(CollectiveError::InvalidLayout(_))));
    }

    #[test]
    fn test_layout_rejects_overrun() {
        let result = validate_exchange_layout(Rank(0), 2, 12, &[12, 12], &[0, 12], 20);
        assert!(matches!(result, Err(CollectiveError::InvalidLayout(_))));
    }

    #[test]
    fn test_layout_rejects_wrong_arity() {
        let result = validate_exchange_layout(Rank(0), 3, 0, &[0, 0], &[0, 0], 0);
        assert!(matches!(result, Err(CollectiveError::InvalidLayout(_))));
    }

    #[test]
    fn test_emitted_spike_packs_with_zero_auxiliary() {
        let record = EmittedSpike::new(5, 12.3).into_record();
        assert_eq!(record.sender_id(), 5);
        assert_eq!(record.auxiliary_id(), 0);
        assert_eq!(record.time(), 12.3);
    }
}
