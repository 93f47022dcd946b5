//! Transport error types.

use crate::CollectiveOp;
use cosim_types::Rank;
use std::time::Duration;
use thiserror::Error;

/// Errors a collective call can return.
///
/// A blocking transport without a timeout never returns `Timeout`; it hangs
/// instead. Every other variant is a coordination failure that leaves the
/// job unusable: no transport retries a collective.
#[derive(Debug, Error)]
pub enum CollectiveError {
    /// A peer did not issue the matching call in time.
    #[error("{op} timed out after {after:?} waiting for {peer}")]
    Timeout {
        op: CollectiveOp,
        peer: Rank,
        after: Duration,
    },

    /// A peer went away mid-run.
    #[error("{peer} disconnected during {op}")]
    PeerDisconnected { op: CollectiveOp, peer: Rank },

    /// A peer issued a different collective, or the same one out of sequence.
    #[error("call order violation from {peer}: expected {expected} #{expected_seq}, got {got} #{got_seq}")]
    CallOrderViolation {
        peer: Rank,
        expected: CollectiveOp,
        expected_seq: u64,
        got: CollectiveOp,
        got_seq: u64,
    },

    /// A peer's buffer did not have the size this rank was told to expect.
    #[error("{op}: {peer} delivered {got} bytes, expected {expected}")]
    LengthMismatch {
        op: CollectiveOp,
        peer: Rank,
        expected: usize,
        got: usize,
    },

    /// Broadcast root outside the job.
    #[error("root {root} is outside a job of {size} ranks")]
    InvalidRoot { root: Rank, size: usize },

    /// Receive counts or offsets that do not describe the receive buffer.
    #[error("invalid exchange layout: {0}")]
    InvalidLayout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed transport traffic.
    #[error("protocol error: {0}")]
    Protocol(String),
}
