//! Core traits for cosim.
//!
//! - [`CollectiveChannel`]: the blocking collective transport every process
//!   talks through. Protocol logic is written against this trait only, so a
//!   timeout-aware or asynchronous backend can be substituted without touching
//!   it.
//! - [`LocalSimulator`]: the boundary with the black-box simulator running in
//!   each process.
//! - [`ScalarBroadcast`]: typed single-value broadcasts for the handshake.

mod error;
mod message;
mod scalar;
mod traits;

pub use error::CollectiveError;
pub use message::CollectiveOp;
pub use scalar::{ScalarBroadcast, WireScalar};
pub use traits::{validate_exchange_layout, CollectiveChannel, EmittedSpike, LocalSimulator};
