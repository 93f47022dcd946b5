//! Collective transport over MPI.
//!
//! [`MpiChannel`] maps each collective onto its MPI counterpart on the
//! world communicator:
//!
//! - **broadcast**: `MPI_Bcast` from the root process
//! - **count exchange**: `MPI_Allgather` of one `u32` per rank
//! - **byte exchange**: `MPI_Allgatherv` into the caller's receive layout
//!
//! [`MpiChannel::split_group`] forms the per-group sub-communicator with
//! `MPI_Comm_split`, keyed by world rank so local ranks follow global order.
//!
//! MPI reports failures by aborting the job, so this backend never returns
//! timeouts or call order violations. The MPI bindings are behind the `mpi`
//! feature; without it only the layout helpers are built.

#[cfg(feature = "mpi")]
mod channel;
mod partition;
mod placement;

#[cfg(feature = "mpi")]
pub use channel::{initialize, GroupCommunicator, MpiChannel};
pub use partition::{mpi_rank, Partition};
pub use placement::GroupPlacement;
