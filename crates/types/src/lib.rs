//! Core types for cosim.
//!
//! This crate provides the data model shared by every other crate:
//!
//! - **Identifiers**: Rank, GroupColor, StepIndex
//! - **Topology**: GroupView (a process's own group) and GroupLayout (both roots)
//! - **Spike records**: the fixed 12-byte record and its codec
//! - **Handshake state**: entity counts, communication interval, step count
//! - **Frames**: per-step local and merged record sets
//!
//! # Design Philosophy
//!
//! This crate does not depend on any other workspace crates, making it the
//! foundation layer.

mod frame;
mod handshake;
mod identifiers;
mod spike;
mod topology;

pub use frame::{MergedSpikes, StepFrame};
pub use handshake::{HandshakeState, PerGroup};
pub use identifiers::{GroupColor, Rank, StepIndex};
pub use spike::{
    decode_records, encode_records, record_count, CodecError, SpikeRecord, RECORD_LAYOUT_TAG,
    RECORD_LAYOUT_VERSION, RECORD_SIZE,
};
pub use topology::{GroupLayout, GroupView, GroupViewError, RankLayout};
