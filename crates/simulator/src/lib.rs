//! Cosim Simulator
//!
//! Toy spiking populations driven through the coordination protocol, plus
//! the runner behind the `cosim` binary.
//!
//! # Architecture
//!
//! - **Configuration**: one TOML document describing the job shape, both
//!   populations and the protocol settings
//! - **Populations**: independent Poisson spike sources per rank, with
//!   entity ids assigned once the handshake fixes the id offsets
//! - **Metrics**: exchange latency percentiles and record counts per rank
//! - **Runner**: all ranks as threads over in-memory channels, or one rank
//!   per process over MPI (with the `mpi` feature) or TCP
//!
//! # Example
//!
//! ```ignore
//! use cosim_simulator::{run_local, RunConfig};
//! use cosim_types::RankLayout;
//!
//! let config = RunConfig::default()
//!     .with_ranks(6, 2)
//!     .with_layout(RankLayout::Interleaved);
//!
//! for report in run_local(&config)? {
//!     println!("{}", report);
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod population;
pub mod runner;

pub use config::{ConfigError, PopulationConfig, RunConfig, Transport};
pub use metrics::{MetricsCollector, RankReport};
pub use population::PoissonPopulation;
pub use runner::{run_local, run_rank, run_tcp_worker, run_worker, RunError, WorkerEnv};

#[cfg(feature = "mpi")]
pub use runner::run_mpi_worker;
