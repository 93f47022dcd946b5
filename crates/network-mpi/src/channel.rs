//! [`CollectiveChannel`] over an MPI communicator.

use crate::partition::{mpi_rank, Partition};
use crate::placement::GroupPlacement;
use cosim_core::{validate_exchange_layout, CollectiveChannel, CollectiveError};
use cosim_types::{GroupColor, Rank};
use mpi::datatype::PartitionMut;
use mpi::environment::Universe;
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::*;
use tracing::{debug, trace};

/// Initialize MPI for this process.
///
/// MPI is finalized when the returned universe is dropped, so it must
/// outlive every channel built from it.
pub fn initialize() -> Result<Universe, CollectiveError> {
    mpi::initialize()
        .ok_or_else(|| CollectiveError::Protocol("MPI was already initialized".into()))
}

/// One rank's endpoint of an MPI job.
pub struct MpiChannel {
    world: SimpleCommunicator,
    rank: Rank,
    size: usize,
}

impl std::fmt::Debug for MpiChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpiChannel")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl MpiChannel {
    pub fn new(world: SimpleCommunicator) -> Self {
        let rank = Rank(world.rank() as u32);
        let size = world.size() as usize;
        Self { world, rank, size }
    }

    /// Channel over the world communicator of `universe`.
    pub fn world(universe: &Universe) -> Self {
        Self::new(universe.world())
    }

    /// Split the job into one communicator per group color.
    ///
    /// Collective over the whole job: every rank must call it at the same
    /// point of its call sequence.
    pub fn split_group(&self, color: GroupColor) -> Result<GroupCommunicator, CollectiveError> {
        let comm = self
            .world
            .split_by_color(Color::with_value(color.as_u32() as i32))
            .ok_or_else(|| {
                CollectiveError::Protocol(format!("{} was left out of the {} split", self.rank, color))
            })?;
        let placement = GroupPlacement {
            color,
            local_rank: comm.rank() as usize,
            size: comm.size() as usize,
        };
        debug!(
            rank = self.rank.0,
            %color,
            local_rank = placement.local_rank,
            group_size = placement.size,
            "Group communicator formed"
        );
        Ok(GroupCommunicator { comm, placement })
    }
}

/// The communicator of one group, as formed by [`MpiChannel::split_group`].
pub struct GroupCommunicator {
    comm: SimpleCommunicator,
    placement: GroupPlacement,
}

impl GroupCommunicator {
    pub fn placement(&self) -> GroupPlacement {
        self.placement
    }

    /// The group communicator itself, for the simulator's own traffic.
    pub fn communicator(&self) -> &SimpleCommunicator {
        &self.comm
    }
}

impl CollectiveChannel for MpiChannel {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast(&mut self, root: Rank, buf: &mut [u8]) -> Result<(), CollectiveError> {
        if root.index() >= self.size {
            return Err(CollectiveError::InvalidRoot {
                root,
                size: self.size,
            });
        }
        trace!(rank = self.rank.0, root = root.0, len = buf.len(), "broadcast");
        self.world
            .process_at_rank(mpi_rank(root)?)
            .broadcast_into(buf);
        Ok(())
    }

    fn exchange_counts(&mut self, local: u32) -> Result<Vec<u32>, CollectiveError> {
        trace!(rank = self.rank.0, local, "exchange_counts");
        let mut counts = vec![0u32; self.size];
        self.world.all_gather_into(&local, &mut counts[..]);
        Ok(counts)
    }

    fn exchange_variable_bytes(
        &mut self,
        send: &[u8],
        recv_counts: &[usize],
        recv_displs: &[usize],
        recv: &mut [u8],
    ) -> Result<(), CollectiveError> {
        validate_exchange_layout(
            self.rank,
            self.size,
            send.len(),
            recv_counts,
            recv_displs,
            recv.len(),
        )?;
        let partition = Partition::new(recv_counts, recv_displs)?;
        trace!(rank = self.rank.0, len = send.len(), "exchange_variable_bytes");
        let mut target = PartitionMut::new(recv, partition.counts, partition.displs);
        self.world.all_gather_varcount_into(send, &mut target);
        Ok(())
    }
}
