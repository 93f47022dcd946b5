//! Error types for the coordination protocol.

use cosim_core::CollectiveError;
use cosim_types::{CodecError, GroupColor, GroupViewError, Rank};
use thiserror::Error;

/// Errors during rank discovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// A rank announced a color value no build knows about.
    #[error("{rank} announced unknown color value {value}")]
    UnknownColor { rank: Rank, value: u32 },

    /// Every rank shares one color; there is nobody to exchange with.
    #[error("no rank belongs to the {0} group")]
    MissingGroup(GroupColor),

    /// The contiguity rule produced a peer root outside the peer group.
    #[error("contiguity rule picked {peer_root} as peer root of the {color} group, which is not a peer")]
    UnsupportedLayout { color: GroupColor, peer_root: Rank },

    #[error(transparent)]
    View(#[from] GroupViewError),
}

/// Errors during the handshake.
///
/// Every check runs on every process against broadcast values, so all
/// processes fail at the same point.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandshakeError {
    /// A group root runs a build with a different spike record layout.
    #[error("{color} root uses record layout tag {theirs:#010x}, this build uses {ours:#010x}")]
    LayoutMismatch {
        color: GroupColor,
        theirs: u32,
        ours: u32,
    },

    #[error("{color} root announced invalid entity count {value}")]
    InvalidEntityCount { color: GroupColor, value: i32 },

    #[error("{color} root announced invalid communication estimate {value}")]
    InvalidCommEstimate { color: GroupColor, value: f32 },

    #[error("total duration {0} must be finite and non-negative")]
    InvalidDuration(f64),

    #[error("leaf root announced invalid step count {0}")]
    InvalidStepCount(i32),

    #[error("{total_duration} / {delta} steps does not fit in a 32-bit step count")]
    StepCountOverflow { total_duration: f64, delta: f32 },
}

/// Any failure of the coordination layer.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("transport: {0}")]
    Transport(#[from] CollectiveError),

    #[error("topology: {0}")]
    Topology(#[from] TopologyError),

    #[error("handshake: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("spike codec: {0}")]
    Codec(#[from] CodecError),
}
