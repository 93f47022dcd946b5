//! Channel-backed collective transport.

use cosim_core::{validate_exchange_layout, CollectiveChannel, CollectiveError, CollectiveOp};
use cosim_types::Rank;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::trace;

/// Configuration for an in-memory cluster.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    /// How long a rank waits for a peer inside one collective.
    ///
    /// `None` blocks forever, matching a plain blocking transport.
    pub timeout: Option<Duration>,
}

impl MemoryConfig {
    /// Fail collectives that wait longer than `timeout` on a peer.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// A message between two ranks, tagged with the collective it belongs to.
#[derive(Debug)]
struct Envelope {
    op: CollectiveOp,
    seq: u64,
    payload: Vec<u8>,
}

/// One rank's endpoint of an in-memory cluster.
///
/// Every ordered pair of ranks has its own unbounded FIFO, so sends never
/// block and receives only wait on the specific peer being read. Each
/// collective call increments a sequence number carried by every envelope;
/// a mismatch in operation or sequence surfaces as
/// [`CollectiveError::CallOrderViolation`].
pub struct MemoryChannel {
    rank: Rank,
    size: usize,
    seq: u64,
    timeout: Option<Duration>,
    /// outboxes[peer] sends to `peer`; `None` at our own index.
    outboxes: Vec<Option<Sender<Envelope>>>,
    /// inboxes[peer] receives from `peer`; `None` at our own index.
    inboxes: Vec<Option<Receiver<Envelope>>>,
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("seq", &self.seq)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Create the endpoints of a fully connected cluster of `size` ranks.
///
/// Endpoint `i` belongs to rank `i`. Move each endpoint onto its own thread.
pub fn memory_cluster(size: usize, config: &MemoryConfig) -> Vec<MemoryChannel> {
    let mut outboxes: Vec<Vec<Option<Sender<Envelope>>>> =
        (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
    let mut inboxes: Vec<Vec<Option<Receiver<Envelope>>>> =
        (0..size).map(|_| (0..size).map(|_| None).collect()).collect();

    for from in 0..size {
        for to in 0..size {
            if from == to {
                continue;
            }
            let (tx, rx) = unbounded();
            outboxes[from][to] = Some(tx);
            inboxes[to][from] = Some(rx);
        }
    }

    outboxes
        .into_iter()
        .zip(inboxes)
        .enumerate()
        .map(|(rank, (outboxes, inboxes))| MemoryChannel {
            rank: Rank::from(rank),
            size,
            seq: 0,
            timeout: config.timeout,
            outboxes,
            inboxes,
        })
        .collect()
}

impl MemoryChannel {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn peers(&self) -> impl Iterator<Item = Rank> + '_ {
        (0..self.size)
            .map(Rank::from)
            .filter(move |peer| *peer != self.rank)
    }

    fn send_to(
        &self,
        peer: Rank,
        op: CollectiveOp,
        seq: u64,
        payload: Vec<u8>,
    ) -> Result<(), CollectiveError> {
        let outbox = self.outboxes[peer.index()].as_ref().ok_or_else(|| {
            CollectiveError::Protocol(format!("{} has no outbox to itself", peer))
        })?;
        outbox
            .send(Envelope { op, seq, payload })
            .map_err(|_| CollectiveError::PeerDisconnected { op, peer })
    }

    fn recv_from(
        &self,
        peer: Rank,
        op: CollectiveOp,
        seq: u64,
    ) -> Result<Vec<u8>, CollectiveError> {
        let inbox = self.inboxes[peer.index()].as_ref().ok_or_else(|| {
            CollectiveError::Protocol(format!("{} has no inbox from itself", peer))
        })?;

        let envelope = match self.timeout {
            Some(after) => inbox.recv_timeout(after).map_err(|e| match e {
                RecvTimeoutError::Timeout => CollectiveError::Timeout { op, peer, after },
                RecvTimeoutError::Disconnected => CollectiveError::PeerDisconnected { op, peer },
            })?,
            None => inbox
                .recv()
                .map_err(|_| CollectiveError::PeerDisconnected { op, peer })?,
        };

        if envelope.op != op || envelope.seq != seq {
            return Err(CollectiveError::CallOrderViolation {
                peer,
                expected: op,
                expected_seq: seq,
                got: envelope.op,
                got_seq: envelope.seq,
            });
        }
        Ok(envelope.payload)
    }
}

impl CollectiveChannel for MemoryChannel {
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
        let op = CollectiveOp::Broadcast;
        let seq = self.next_seq();
        trace!(rank = self.rank.0, root = root.0, seq, len = buf.len(), "broadcast");

        if root == self.rank {
            for peer in self.peers() {
                self.send_to(peer, op, seq, buf.to_vec())?;
            }
            return Ok(());
        }

        let payload = self.recv_from(root, op, seq)?;
        if payload.len() != buf.len() {
            return Err(CollectiveError::LengthMismatch {
                op,
                peer: root,
                expected: buf.len(),
                got: payload.len(),
            });
        }
        buf.copy_from_slice(&payload);
        Ok(())
    }

    fn exchange_counts(&mut self, local: u32) -> Result<Vec<u32>, CollectiveError> {
        let op = CollectiveOp::ExchangeCounts;
        let seq = self.next_seq();
        trace!(rank = self.rank.0, seq, local, "exchange_counts");

        for peer in self.peers() {
            self.send_to(peer, op, seq, local.to_le_bytes().to_vec())?;
        }

        let mut counts = vec![0u32; self.size];
        counts[self.rank.index()] = local;
        for peer in self.peers() {
            let payload = self.recv_from(peer, op, seq)?;
            let raw: [u8; 4] =
                payload
                    .as_slice()
                    .try_into()
                    .map_err(|_| CollectiveError::LengthMismatch {
                        op,
                        peer,
                        expected: 4,
                        got: payload.len(),
                    })?;
            counts[peer.index()] = u32::from_le_bytes(raw);
        }
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
        let op = CollectiveOp::ExchangeBytes;
        let seq = self.next_seq();
        trace!(rank = self.rank.0, seq, len = send.len(), "exchange_variable_bytes");

        for peer in self.peers() {
            self.send_to(peer, op, seq, send.to_vec())?;
        }

        let own = self.rank.index();
        recv[recv_displs[own]..recv_displs[own] + send.len()].copy_from_slice(send);

        for peer in self.peers() {
            let payload = self.recv_from(peer, op, seq)?;
            let (count, displ) = (recv_counts[peer.index()], recv_displs[peer.index()]);
            if payload.len() != count {
                return Err(CollectiveError::LengthMismatch {
                    op,
                    peer,
                    expected: count,
                    got: payload.len(),
                });
            }
            recv[displ..displ + count].copy_from_slice(&payload);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_cluster;
    use tracing_test::traced_test;

    #[test]
    fn test_broadcast_from_every_root() {
        for root in 0..3u32 {
            let results = run_cluster(3, &MemoryConfig::default(), |mut channel| {
                let mut buf = if channel.rank() == Rank(root) {
                    vec![root as u8 + 1; 5]
                } else {
                    vec![0u8; 5]
                };
                channel.broadcast(Rank(root), &mut buf).unwrap();
                buf
            });
            for buf in results {
                assert_eq!(buf, vec![root as u8 + 1; 5]);
            }
        }
    }

    #[test]
    fn test_exchange_counts_indexed_by_rank() {
        let results = run_cluster(4, &MemoryConfig::default(), |mut channel| {
            let local = channel.rank().0 * 10;
            channel.exchange_counts(local).unwrap()
        });
        for counts in results {
            assert_eq!(counts, vec![0, 10, 20, 30]);
        }
    }

    #[test]
    fn test_variable_bytes_land_at_offsets() {
        // rank r sends r bytes of value r
        let counts = vec![0usize, 1, 2];
        let displs = vec![0usize, 0, 1];
        let results = run_cluster(3, &MemoryConfig::default(), move |mut channel| {
            let r = channel.rank().index();
            let send = vec![r as u8; r];
            let mut recv = vec![0u8; 3];
            channel
                .exchange_variable_bytes(&send, &counts, &displs, &mut recv)
                .unwrap();
            recv
        });
        for recv in results {
            assert_eq!(recv, vec![1, 2, 2]);
        }
    }

    #[test]
    fn test_single_rank_cluster() {
        let mut channels = memory_cluster(1, &MemoryConfig::default());
        let mut channel = channels.pop().unwrap();
        assert_eq!(channel.exchange_counts(7).unwrap(), vec![7]);
        let mut buf = [9u8; 2];
        channel.broadcast(Rank(0), &mut buf).unwrap();
        assert_eq!(buf, [9, 9]);
    }

    #[test]
    fn test_invalid_root_rejected() {
        let mut channels = memory_cluster(2, &MemoryConfig::default());
        let mut buf = [0u8; 1];
        let result = channels[0].broadcast(Rank(5), &mut buf);
        assert!(matches!(result, Err(CollectiveError::InvalidRoot { .. })));
    }

    #[traced_test]
    #[test]
    fn test_mismatched_calls_detected() {
        let config = MemoryConfig::with_timeout(Duration::from_secs(5));
        let results = run_cluster(2, &config, |mut channel| {
            if channel.rank() == Rank(0) {
                channel.exchange_counts(1).map(|_| ())
            } else {
                // Stay connected until rank 0's envelope has arrived.
                let mut buf = [0u8; 4];
                channel.broadcast(Rank(1), &mut buf)?;
                channel.exchange_counts(1).map(|_| ())
            }
        });
        assert!(results[1].is_err());
        assert!(matches!(
            results[0],
            Err(CollectiveError::CallOrderViolation {
                expected: CollectiveOp::ExchangeCounts,
                got: CollectiveOp::Broadcast,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_peer_times_out() {
        let config = MemoryConfig::with_timeout(Duration::from_millis(50));
        let mut channels = memory_cluster(2, &config);
        let _silent = channels.pop();
        let result = channels[0].exchange_counts(3);
        assert!(matches!(
            result,
            Err(CollectiveError::Timeout {
                op: CollectiveOp::ExchangeCounts,
                peer: Rank(1),
                ..
            })
        ));
    }

    #[test]
    fn test_dropped_peer_reports_disconnect() {
        let mut channels = memory_cluster(2, &MemoryConfig::default());
        drop(channels.pop());
        let result = channels[0].exchange_counts(3);
        assert!(matches!(
            result,
            Err(CollectiveError::PeerDisconnected { peer: Rank(1), .. })
        ));
    }
}
