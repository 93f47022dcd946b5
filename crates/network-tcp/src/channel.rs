//! Hub-and-spoke collective transport.

use crate::codec::{decode_gathered, encode_gathered, Frame, FrameError, FrameKind};
use bytes::Bytes;
use cosim_core::{validate_exchange_layout, CollectiveChannel, CollectiveError, CollectiveOp};
use cosim_types::Rank;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const HUB: Rank = Rank::ZERO;

/// Delay between connection attempts while the hub is not yet listening.
const CONNECT_RETRY: Duration = Duration::from_millis(50);

/// Configuration for one rank of a TCP job.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub rank: Rank,
    pub size: usize,
    /// Address rank 0 listens on and every other rank connects to.
    pub hub_addr: SocketAddr,
    /// Per-collective wait limit. `None` blocks forever.
    pub timeout: Option<Duration>,
    /// How long joining the job may take, for the hub and the spokes alike.
    pub connect_timeout: Duration,
}

impl TcpConfig {
    pub fn new(rank: Rank, size: usize, hub_addr: SocketAddr) -> Self {
        Self {
            rank,
            size,
            hub_addr,
            timeout: None,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sockets reject a zero read timeout, so refuse it before joining.
    fn check(&self) -> Result<(), CollectiveError> {
        if self.timeout == Some(Duration::ZERO) {
            return Err(CollectiveError::Protocol(
                "collective timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

enum Role {
    /// Rank 0: one stream per other rank, indexed by rank (slot 0 unused).
    Hub { spokes: Vec<Option<TcpStream>> },
    Spoke { hub: TcpStream },
}

/// One rank's endpoint of a TCP job.
///
/// Rank 0 is the hub: every collective is routed through it. A broadcast
/// from another root is relayed by the hub, and both exchanges are gathered
/// at the hub and fanned back out.
pub struct TcpChannel {
    rank: Rank,
    size: usize,
    seq: u64,
    timeout: Option<Duration>,
    role: Role,
}

impl std::fmt::Debug for TcpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpChannel")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("seq", &self.seq)
            .field("hub", &self.is_hub())
            .finish()
    }
}

impl TcpChannel {
    /// Join the job described by `config`: rank 0 binds the hub address and
    /// waits for everyone, other ranks connect to it.
    pub fn establish(config: &TcpConfig) -> Result<Self, CollectiveError> {
        if config.rank == HUB {
            let listener = TcpListener::bind(config.hub_addr)?;
            Self::accept(listener, config)
        } else {
            Self::connect(config)
        }
    }

    /// Act as the hub on an already bound listener.
    pub fn accept(listener: TcpListener, config: &TcpConfig) -> Result<Self, CollectiveError> {
        config.check()?;
        let deadline = Instant::now() + config.connect_timeout;
        let mut spokes: Vec<Option<TcpStream>> = (0..config.size).map(|_| None).collect();
        listener.set_nonblocking(true)?;

        let mut joined = 1;
        while joined < config.size {
            let (mut stream, addr) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(join_timeout(config.connect_timeout));
                    }
                    std::thread::sleep(CONNECT_RETRY);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            stream.set_nonblocking(false)?;
            stream.set_nodelay(true)?;
            stream.set_read_timeout(Some(config.connect_timeout))?;

            let (rank, size) = Frame::read_from(&mut stream)
                .and_then(|frame| frame.hello_fields())
                .map_err(protocol)?;
            if size as usize != config.size {
                return Err(CollectiveError::Protocol(format!(
                    "{} at {} joined a job of {} ranks, hub expects {}",
                    Rank(rank),
                    addr,
                    size,
                    config.size
                )));
            }
            let slot = spokes
                .get_mut(rank as usize)
                .filter(|_| rank != HUB.0)
                .ok_or_else(|| {
                    CollectiveError::Protocol(format!("{} outside the job joined", Rank(rank)))
                })?;
            if slot.is_some() {
                return Err(CollectiveError::Protocol(format!(
                    "{} joined twice",
                    Rank(rank)
                )));
            }
            debug!(rank, %addr, "Rank joined");
            stream.set_read_timeout(config.timeout)?;
            *slot = Some(stream);
            joined += 1;
        }

        let welcome = Frame::hello(HUB.0, config.size as u32);
        for stream in spokes.iter_mut().flatten() {
            welcome.write_to(stream).map_err(protocol)?;
        }
        info!(size = config.size, "Job assembled");

        Ok(Self {
            rank: HUB,
            size: config.size,
            seq: 0,
            timeout: config.timeout,
            role: Role::Hub { spokes },
        })
    }

    /// Join as a spoke, retrying until the hub accepts or the connect
    /// timeout expires.
    pub fn connect(config: &TcpConfig) -> Result<Self, CollectiveError> {
        config.check()?;
        let deadline = Instant::now() + config.connect_timeout;
        let mut hub = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(join_timeout(config.connect_timeout));
            }
            match TcpStream::connect_timeout(&config.hub_addr, remaining) {
                Ok(stream) => break stream,
                Err(e) => {
                    trace!(error = %e, addr = %config.hub_addr, "Hub not reachable yet");
                    std::thread::sleep(CONNECT_RETRY.min(remaining));
                }
            }
        };
        hub.set_nodelay(true)?;

        Frame::hello(config.rank.0, config.size as u32)
            .write_to(&mut hub)
            .map_err(protocol)?;
        hub.set_read_timeout(Some(config.connect_timeout))?;
        let (_, size) = Frame::read_from(&mut hub)
            .and_then(|frame| frame.hello_fields())
            .map_err(protocol)?;
        if size as usize != config.size {
            return Err(CollectiveError::Protocol(format!(
                "hub runs a job of {} ranks, expected {}",
                size, config.size
            )));
        }
        hub.set_read_timeout(config.timeout)?;
        debug!(rank = config.rank.0, "Joined job");

        Ok(Self {
            rank: config.rank,
            size: config.size,
            seq: 0,
            timeout: config.timeout,
            role: Role::Spoke { hub },
        })
    }

    fn is_hub(&self) -> bool {
        matches!(self.role, Role::Hub { .. })
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn stream(&mut self, peer: Rank) -> Result<&mut TcpStream, CollectiveError> {
        let stream = match &mut self.role {
            Role::Hub { spokes } => spokes.get_mut(peer.index()).and_then(Option::as_mut),
            Role::Spoke { hub } if peer == HUB => Some(hub),
            Role::Spoke { .. } => None,
        };
        stream.ok_or_else(|| CollectiveError::Protocol(format!("no connection to {}", peer)))
    }

    fn send(
        &mut self,
        peer: Rank,
        op: CollectiveOp,
        seq: u64,
        payload: Bytes,
    ) -> Result<(), CollectiveError> {
        let frame = Frame::collective(op, seq, payload);
        frame
            .write_to(self.stream(peer)?)
            .map_err(|e| frame_failure(e, op, peer, None))
    }

    fn recv(&mut self, peer: Rank, op: CollectiveOp, seq: u64) -> Result<Bytes, CollectiveError> {
        let timeout = self.timeout;
        let frame =
            Frame::read_from(self.stream(peer)?).map_err(|e| frame_failure(e, op, peer, timeout))?;
        match frame.kind {
            FrameKind::Collective(got) if got == op && frame.seq == seq => Ok(frame.payload),
            FrameKind::Collective(got) => Err(CollectiveError::CallOrderViolation {
                peer,
                expected: op,
                expected_seq: seq,
                got,
                got_seq: frame.seq,
            }),
            FrameKind::Hello => Err(CollectiveError::Protocol(format!(
                "unexpected hello from {} during {}",
                peer, op
            ))),
            FrameKind::Abort => Err(CollectiveError::Protocol(format!(
                "hub aborted {} #{}: {}",
                op,
                frame.seq,
                frame.abort_reason()
            ))),
        }
    }

    fn spokes(&self) -> impl Iterator<Item = Rank> {
        (1..self.size).map(Rank::from)
    }

    /// Hub side of a gather: collect one block per spoke, in rank order,
    /// with the hub's own block at index 0.
    fn gather(
        &mut self,
        op: CollectiveOp,
        seq: u64,
        own: Bytes,
    ) -> Result<Vec<Bytes>, CollectiveError> {
        let mut blocks = Vec::with_capacity(self.size);
        blocks.push(own);
        for peer in self.spokes() {
            blocks.push(self.recv(peer, op, seq)?);
        }
        Ok(blocks)
    }

    fn fan_out(
        &mut self,
        op: CollectiveOp,
        seq: u64,
        payload: &Bytes,
    ) -> Result<(), CollectiveError> {
        for peer in self.spokes() {
            self.send(peer, op, seq, payload.clone())?;
        }
        Ok(())
    }

    /// Hub side of one collective. On failure every spoke is told to give
    /// up, so no rank keeps waiting on a reply that will never come.
    fn hub_round<T>(
        &mut self,
        op: CollectiveOp,
        seq: u64,
        round: impl FnOnce(&mut Self) -> Result<T, CollectiveError>,
    ) -> Result<T, CollectiveError> {
        let result = round(self);
        if let Err(e) = &result {
            warn!(%op, seq, error = %e, "Collective failed at the hub, aborting spokes");
            let notice = Frame::abort(seq, &e.to_string());
            for peer in self.spokes() {
                // spokes that already left are not waiting anyway
                if let Ok(stream) = self.stream(peer) {
                    let _ = notice.write_to(stream);
                }
            }
        }
        result
    }
}

fn protocol(e: FrameError) -> CollectiveError {
    match e {
        FrameError::Io(e) => CollectiveError::Io(e),
        other => CollectiveError::Protocol(other.to_string()),
    }
}

fn join_timeout(after: Duration) -> CollectiveError {
    CollectiveError::Protocol(format!("job did not assemble within {:?}", after))
}

fn frame_failure(
    e: FrameError,
    op: CollectiveOp,
    peer: Rank,
    timeout: Option<Duration>,
) -> CollectiveError {
    match e {
        FrameError::Io(e) => io_failure(e, op, peer, timeout),
        other => protocol(other),
    }
}

fn io_failure(
    e: std::io::Error,
    op: CollectiveOp,
    peer: Rank,
    timeout: Option<Duration>,
) -> CollectiveError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => CollectiveError::Timeout {
            op,
            peer,
            after: timeout.unwrap_or_default(),
        },
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => CollectiveError::PeerDisconnected { op, peer },
        _ => CollectiveError::Io(e),
    }
}

fn expect_len(
    op: CollectiveOp,
    peer: Rank,
    expected: usize,
    got: usize,
) -> Result<(), CollectiveError> {
    if expected != got {
        return Err(CollectiveError::LengthMismatch {
            op,
            peer,
            expected,
            got,
        });
    }
    Ok(())
}

impl CollectiveChannel for TcpChannel {
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

        if !self.is_hub() {
            if self.rank == root {
                return self.send(HUB, op, seq, Bytes::copy_from_slice(buf));
            }
            let payload = self.recv(HUB, op, seq)?;
            expect_len(op, root, buf.len(), payload.len())?;
            buf.copy_from_slice(&payload);
            return Ok(());
        }

        self.hub_round(op, seq, |hub| {
            let payload = if root == HUB {
                Bytes::copy_from_slice(buf)
            } else {
                let payload = hub.recv(root, op, seq)?;
                expect_len(op, root, buf.len(), payload.len())?;
                buf.copy_from_slice(&payload);
                payload
            };
            for peer in hub.spokes().filter(|peer| *peer != root) {
                hub.send(peer, op, seq, payload.clone())?;
            }
            Ok(())
        })
    }

    fn exchange_counts(&mut self, local: u32) -> Result<Vec<u32>, CollectiveError> {
        let op = CollectiveOp::ExchangeCounts;
        let seq = self.next_seq();
        trace!(rank = self.rank.0, seq, local, "exchange_counts");
        let own = Bytes::copy_from_slice(&local.to_le_bytes());

        let table = if self.is_hub() {
            self.hub_round(op, seq, |hub| {
                let blocks = hub.gather(op, seq, own)?;
                for (index, block) in blocks.iter().enumerate() {
                    expect_len(op, Rank::from(index), 4, block.len())?;
                }
                let table = Bytes::from(blocks.concat());
                hub.fan_out(op, seq, &table)?;
                Ok(table)
            })?
        } else {
            self.send(HUB, op, seq, own)?;
            let table = self.recv(HUB, op, seq)?;
            expect_len(op, HUB, 4 * self.size, table.len())?;
            table
        };

        Ok(table
            .chunks_exact(4)
            .map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect())
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
        let own = Bytes::copy_from_slice(send);

        let blocks = if self.is_hub() {
            self.hub_round(op, seq, |hub| {
                let blocks = hub.gather(op, seq, own)?;
                let reply = encode_gathered(&blocks).map_err(protocol)?;
                hub.fan_out(op, seq, &reply)?;
                Ok(blocks)
            })?
        } else {
            self.send(HUB, op, seq, own)?;
            let reply = self.recv(HUB, op, seq)?;
            decode_gathered(reply, self.size).map_err(protocol)?
        };

        for (index, block) in blocks.iter().enumerate() {
            let (count, displ) = (recv_counts[index], recv_displs[index]);
            expect_len(op, Rank::from(index), count, block.len())?;
            recv[displ..displ + count].copy_from_slice(block);
        }
        Ok(())
    }
}
