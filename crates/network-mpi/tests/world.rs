//! Collectives over the MPI world of this test process.
//!
//! `cargo test --features mpi` runs as a one-rank job; under
//! `mpiexec -n N` every rank runs the same checks.

#![cfg(feature = "mpi")]

use cosim_core::CollectiveChannel;
use cosim_network_mpi::{initialize, MpiChannel};
use cosim_types::{GroupColor, GroupView, Rank};

// MPI can be initialized once per process, so everything shares one test.
#[test]
fn test_collectives_over_world() {
    let universe = initialize().unwrap();
    let mut channel = MpiChannel::world(&universe);
    let rank = channel.rank().index();
    let size = channel.size();

    let mut buf = if rank == 0 { vec![7u8; 5] } else { vec![0u8; 5] };
    channel.broadcast(Rank(0), &mut buf).unwrap();
    assert_eq!(buf, vec![7u8; 5]);
    assert!(channel.broadcast(Rank::from(size), &mut buf).is_err());

    let counts = channel.exchange_counts(rank as u32 + 1).unwrap();
    assert_eq!(counts, (1..=size as u32).collect::<Vec<_>>());

    let byte_counts: Vec<usize> = counts.iter().map(|&c| c as usize).collect();
    let displs: Vec<usize> = byte_counts
        .iter()
        .scan(0, |offset, &len| {
            let start = *offset;
            *offset += len;
            Some(start)
        })
        .collect();
    let send = vec![rank as u8; byte_counts[rank]];
    let mut recv = vec![0u8; byte_counts.iter().sum()];
    channel
        .exchange_variable_bytes(&send, &byte_counts, &displs, &mut recv)
        .unwrap();
    for (index, (&count, &displ)) in byte_counts.iter().zip(&displs).enumerate() {
        assert!(recv[displ..displ + count].iter().all(|&b| b == index as u8));
    }

    // even ranks host, odd ranks leaf
    let color = GroupColor::from_flag(rank % 2 == 0);
    let group = channel.split_group(color).unwrap();
    let members: Vec<Rank> = (0..size)
        .filter(|r| GroupColor::from_flag(r % 2 == 0) == color)
        .map(Rank::from)
        .collect();
    let view = GroupView::new(color, channel.rank(), members).unwrap();
    group.placement().confirm(&view).unwrap();
}
