//! Receive layouts in the `i32` form MPI takes them.

use cosim_core::CollectiveError;
use cosim_types::Rank;

/// Per-rank element counts and displacements for a gather-varcount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub counts: Vec<i32>,
    pub displs: Vec<i32>,
}

impl Partition {
    /// Narrow a validated receive layout. Fails when a count or offset does
    /// not fit MPI's `int`.
    pub fn new(recv_counts: &[usize], recv_displs: &[usize]) -> Result<Self, CollectiveError> {
        Ok(Self {
            counts: narrow("count", recv_counts)?,
            displs: narrow("offset", recv_displs)?,
        })
    }
}

fn narrow(what: &str, values: &[usize]) -> Result<Vec<i32>, CollectiveError> {
    values
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            i32::try_from(value).map_err(|_| {
                CollectiveError::InvalidLayout(format!(
                    "{} of {} is {}, above the MPI limit of {}",
                    what,
                    Rank::from(index),
                    value,
                    i32::MAX
                ))
            })
        })
        .collect()
}

/// A rank as MPI numbers it.
pub fn mpi_rank(rank: Rank) -> Result<i32, CollectiveError> {
    i32::try_from(rank.0)
        .map_err(|_| CollectiveError::Protocol(format!("{} is outside MPI's rank range", rank)))
}
