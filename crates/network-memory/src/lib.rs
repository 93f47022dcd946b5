//! In-process collective transport.
//!
//! Runs every rank of a job as a thread of one process, connected by
//! channels. Used by tests and by the single-process `local` run mode.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  FIFO per ordered pair  ┌──────────────┐
//! │ rank 0       │ ──────────────────────▶ │ rank 1       │
//! │ MemoryChannel│ ◀────────────────────── │ MemoryChannel│
//! └──────────────┘                         └──────────────┘
//!        ▲  │                                     ▲  │
//!        │  ▼            ... rank N-1 ...         │  ▼
//! ```
//!
//! Collectives are built from point-to-point sends: a broadcast is the root
//! sending to everyone, a count or byte exchange is everyone sending to
//! everyone. Envelopes carry `(op, seq)` so diverging call sequences are
//! detected.

mod channel;

pub use channel::{memory_cluster, MemoryChannel, MemoryConfig};

use std::thread;

/// Run `body` once per rank, each on its own named thread, and collect the
/// results indexed by rank.
///
/// Rank threads run inside the caller's current span. A panic on any rank
/// is re-raised on the caller once every thread has finished.
pub fn run_cluster<T, F>(size: usize, config: &MemoryConfig, body: F) -> Vec<T>
where
    T: Send,
    F: Fn(MemoryChannel) -> T + Sync,
{
    let channels = memory_cluster(size, config);
    let body = &body;
    let parent = tracing::Span::current();

    thread::scope(|scope| {
        let handles: Vec<_> = channels
            .into_iter()
            .enumerate()
            .map(|(rank, channel)| {
                let parent = parent.clone();
                thread::Builder::new()
                    .name(format!("rank-{}", rank))
                    .spawn_scoped(scope, move || parent.in_scope(|| body(channel)))
                    .unwrap_or_else(|e| panic!("failed to spawn rank {} thread: {}", rank, e))
            })
            .collect();

        let mut results = Vec::with_capacity(size);
        let mut panic = None;
        for handle in handles {
            match handle.join() {
                Ok(value) => results.push(value),
                Err(payload) => {
                    panic.get_or_insert(payload);
                }
            }
        }
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        results
    })
}
