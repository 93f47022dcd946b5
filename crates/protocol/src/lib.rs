//! Coordination protocol between a leaf and a host simulator group.
//!
//! This crate runs on top of any [`CollectiveChannel`](cosim_core::CollectiveChannel)
//! and drives a [`LocalSimulator`](cosim_core::LocalSimulator) through a
//! coordinated run:
//!
//! 1. [`discover`]: learn the own group, its root and the peer group's root
//! 2. [`handshake`]: agree on entity counts, the communication interval
//!    and the number of steps
//! 3. [`StepScheduler`]: drain, [`exchange_spikes`], deliver, advance,
//!    once per step
//!
//! [`run_session`] chains the three.
//!
//! # Collective discipline
//!
//! Every public operation that takes a channel is collective. All processes
//! must call the same operations in the same order with the same
//! [`ProtocolConfig`]; validation failures are detected identically on every
//! process so that a bad input fails the job instead of hanging it.
//!
//! # Context
//!
//! [`CoordinationContext`] carries the process's rank, color, configuration
//! and logging span. It is built once and passed explicitly.

mod config;
mod context;
mod error;
mod exchange;
mod handshake;
mod scheduler;
mod session;
mod topology;

pub use config::{ProtocolConfig, RootDiscovery};
pub use context::CoordinationContext;
pub use error::{CoordinationError, HandshakeError, TopologyError};
pub use exchange::{exchange_spikes, ExchangePlan};
pub use handshake::{compute_step_count, handshake, HandshakeInputs};
pub use scheduler::{RunSummary, StepReport, StepScheduler};
pub use session::{run_session, SessionReport};
pub use topology::{contiguous_peer_root, discover};
