//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Global rank of a process within the whole cooperating job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Rank(pub u32);

impl Rank {
    /// The first rank of any job. Hosts the hub in star-shaped transports.
    pub const ZERO: Self = Rank(0);

    /// Rank as an index into per-rank vectors.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Get the next rank.
    pub fn next(self) -> Self {
        Rank(self.0 + 1)
    }
}

impl From<usize> for Rank {
    fn from(index: usize) -> Self {
        Rank(index as u32)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rank({})", self.0)
    }
}

/// Which of the two cooperating simulators a process belongs to.
///
/// The leaf group plays the role of "group A" in the handshake: its root
/// broadcasts first and is the one that computes the step count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupColor {
    Leaf,
    Host,
}

impl GroupColor {
    /// Both colors, in handshake order.
    pub const ALL: [GroupColor; 2] = [GroupColor::Leaf, GroupColor::Host];

    /// Map the boolean color flag used by launchers (`true` = host).
    pub fn from_flag(is_host: bool) -> Self {
        if is_host {
            GroupColor::Host
        } else {
            GroupColor::Leaf
        }
    }

    /// The boolean color flag (`true` = host).
    pub fn is_host(self) -> bool {
        matches!(self, GroupColor::Host)
    }

    /// Numeric form used when a color is announced over the wire.
    pub fn as_u32(self) -> u32 {
        match self {
            GroupColor::Leaf => 0,
            GroupColor::Host => 1,
        }
    }

    /// Parse the numeric wire form. Returns `None` for unknown values.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(GroupColor::Leaf),
            1 => Some(GroupColor::Host),
            _ => None,
        }
    }

    /// The other group.
    pub fn peer(self) -> Self {
        match self {
            GroupColor::Leaf => GroupColor::Host,
            GroupColor::Host => GroupColor::Leaf,
        }
    }
}

impl fmt::Display for GroupColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupColor::Leaf => write!(f, "leaf"),
            GroupColor::Host => write!(f, "host"),
        }
    }
}

impl std::str::FromStr for GroupColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "leaf" | "a" => Ok(GroupColor::Leaf),
            "host" | "b" => Ok(GroupColor::Host),
            _ => Err(format!("Unknown group color: {}", s)),
        }
    }
}

/// Index of a coordinated step in the exchange loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StepIndex(pub u64);

impl StepIndex {
    /// The first step.
    pub const FIRST: Self = StepIndex(0);

    /// Get the next step.
    pub fn next(self) -> Self {
        StepIndex(self.0 + 1)
    }
}

impl fmt::Display for StepIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step({})", self.0)
    }
}
