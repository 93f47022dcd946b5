//! Multi-process collective transport over blocking TCP.
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────┐
//!     ┌───────▶│ rank 0 (hub) │◀───────┐
//!     │        └──────────────┘        │
//!     ▼                ▲               ▼
//! ┌────────┐           │          ┌────────┐
//! │ rank 1 │           ▼          │ rank 3 │
//! └────────┘       ┌────────┐     └────────┘
//!                  │ rank 2 │
//!                  └────────┘
//! ```
//!
//! Rank 0 listens and every other rank connects to it. Each connection
//! starts with a hello frame carrying the rank and the job size; the hub
//! answers every spoke once the whole job has joined. Collectives are routed
//! through the hub:
//!
//! - **broadcast**: the root's buffer reaches the hub (directly or sent by a
//!   spoke root) and is relayed to every other spoke
//! - **count exchange**: counts are gathered at the hub and the table is
//!   sent back to everyone
//! - **byte exchange**: blocks are gathered at the hub and sent back as one
//!   reply with a per-rank length table
//!
//! Every frame carries the operation and sequence number of its collective,
//! so a rank issuing a different call is reported instead of misread. When a
//! collective fails at the hub, the hub sends an abort frame to every spoke
//! so the whole job fails together.

mod channel;
mod codec;

pub use channel::{TcpChannel, TcpConfig};
pub use codec::{decode_gathered, encode_gathered, Frame, FrameError, FrameKind, HEADER_LEN};
