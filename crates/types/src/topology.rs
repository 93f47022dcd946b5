//! Group layout types produced by rank discovery.

use crate::{GroupColor, Rank};
use serde::{Deserialize, Serialize};

/// Errors that can occur when building a group view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupViewError {
    /// The local rank is not a member of the group it claims.
    #[error("{rank} is not a member of its own {color} group")]
    NotAMember { rank: Rank, color: GroupColor },

    /// A group must contain at least one rank.
    #[error("{0} group is empty")]
    Empty(GroupColor),
}

/// One process's view of its own group: the sorted global ranks sharing its
/// color and its position among them.
///
/// This is the sub-communicator of the process: `local_rank` is the rank it
/// would have inside a communicator restricted to its own color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupView {
    color: GroupColor,
    members: Vec<Rank>,
    local_rank: usize,
}

impl GroupView {
    /// Build a view from an unsorted member list.
    pub fn new(
        color: GroupColor,
        rank: Rank,
        mut members: Vec<Rank>,
    ) -> Result<Self, GroupViewError> {
        if members.is_empty() {
            return Err(GroupViewError::Empty(color));
        }
        members.sort_unstable();
        members.dedup();
        let local_rank = members
            .binary_search(&rank)
            .map_err(|_| GroupViewError::NotAMember { rank, color })?;
        Ok(Self {
            color,
            members,
            local_rank,
        })
    }

    pub fn color(&self) -> GroupColor {
        self.color
    }

    /// Sorted global ranks of every group member.
    pub fn members(&self) -> &[Rank] {
        &self.members
    }

    /// Position of this process inside its group.
    pub fn local_rank(&self) -> usize {
        self.local_rank
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Smallest global rank in the group.
    pub fn min_rank(&self) -> Rank {
        self.members[0]
    }

    /// Largest global rank in the group.
    pub fn max_rank(&self) -> Rank {
        self.members[self.members.len() - 1]
    }

    pub fn contains(&self, rank: Rank) -> bool {
        self.members.binary_search(&rank).is_ok()
    }
}

/// The result of rank discovery: the process's own group and the roots of
/// both groups.
///
/// Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLayout {
    rank: Rank,
    world_size: usize,
    own: GroupView,
    own_root: Rank,
    peer_root: Rank,
}

impl GroupLayout {
    pub fn new(
        rank: Rank,
        world_size: usize,
        own: GroupView,
        own_root: Rank,
        peer_root: Rank,
    ) -> Self {
        Self {
            rank,
            world_size,
            own,
            own_root,
            peer_root,
        }
    }

    /// Global rank of this process.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of processes in the whole job.
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn color(&self) -> GroupColor {
        self.own.color()
    }

    pub fn own_group(&self) -> &GroupView {
        &self.own
    }

    pub fn own_root(&self) -> Rank {
        self.own_root
    }

    pub fn peer_root(&self) -> Rank {
        self.peer_root
    }

    /// Size of the peer group, derived from the world size.
    pub fn peer_size(&self) -> usize {
        self.world_size - self.own.size()
    }

    /// Root of the group with the given color.
    pub fn root_of(&self, color: GroupColor) -> Rank {
        if color == self.own.color() {
            self.own_root
        } else {
            self.peer_root
        }
    }

    /// Whether this process is the root of its own group.
    pub fn is_own_root(&self) -> bool {
        self.rank == self.own_root
    }
}

/// How a launcher assigns colors to the ranks of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankLayout {
    /// Leaf ranks first, host ranks after.
    #[default]
    Prefix,

    /// Host ranks first, leaf ranks after.
    Suffix,

    /// Alternate leaf and host, starting with leaf, until one group runs out.
    Interleaved,
}

impl RankLayout {
    /// Color of every rank of a job with `size` ranks, `leaf_ranks` of them
    /// in the leaf group.
    pub fn colors(self, size: usize, leaf_ranks: usize) -> Vec<GroupColor> {
        let leaf_ranks = leaf_ranks.min(size);
        let host_ranks = size - leaf_ranks;
        match self {
            RankLayout::Prefix => std::iter::repeat(GroupColor::Leaf)
                .take(leaf_ranks)
                .chain(std::iter::repeat(GroupColor::Host).take(host_ranks))
                .collect(),
            RankLayout::Suffix => std::iter::repeat(GroupColor::Host)
                .take(host_ranks)
                .chain(std::iter::repeat(GroupColor::Leaf).take(leaf_ranks))
                .collect(),
            RankLayout::Interleaved => {
                let (mut leaf_left, mut host_left) = (leaf_ranks, host_ranks);
                (0..size)
                    .map(|index| {
                        if (index % 2 == 0 && leaf_left > 0) || host_left == 0 {
                            leaf_left -= 1;
                            GroupColor::Leaf
                        } else {
                            host_left -= 1;
                            GroupColor::Host
                        }
                    })
                    .collect()
            }
        }
    }
}

impl std::str::FromStr for RankLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prefix" => Ok(RankLayout::Prefix),
            "suffix" => Ok(RankLayout::Suffix),
            "interleaved" => Ok(RankLayout::Interleaved),
            _ => Err(format!("Unknown rank layout: {}", s)),
        }
    }
}
