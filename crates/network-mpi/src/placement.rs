//! Where a communicator split put this process.

use cosim_core::CollectiveError;
use cosim_types::{GroupColor, GroupView};

/// A process's position in its group communicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupPlacement {
    pub color: GroupColor,
    pub local_rank: usize,
    pub size: usize,
}

impl GroupPlacement {
    /// Confirm the split agrees with the group rank discovery found.
    pub fn confirm(&self, view: &GroupView) -> Result<(), CollectiveError> {
        if self.color != view.color()
            || self.local_rank != view.local_rank()
            || self.size != view.size()
        {
            return Err(CollectiveError::Protocol(format!(
                "communicator split placed this rank at {}/{} of {}, discovery found {}/{} of {}",
                self.local_rank,
                self.size,
                self.color,
                view.local_rank(),
                view.size(),
                view.color()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosim_types::Rank;

    fn view(color: GroupColor, rank: u32, members: &[u32]) -> GroupView {
        GroupView::new(color, Rank(rank), members.iter().copied().map(Rank).collect()).unwrap()
    }

    #[test]
    fn test_matching_split_confirmed() {
        let placement = GroupPlacement {
            color: GroupColor::Host,
            local_rank: 1,
            size: 3,
        };
        placement.confirm(&view(GroupColor::Host, 3, &[1, 3, 5])).unwrap();
    }

    #[test]
    fn test_diverging_split_reported() {
        let placement = GroupPlacement {
            color: GroupColor::Leaf,
            local_rank: 0,
            size: 2,
        };
        // same color, but this rank is second in the discovered group
        let result = placement.confirm(&view(GroupColor::Leaf, 4, &[2, 4]));
        assert!(matches!(&result, Err(CollectiveError::Protocol(msg)) if msg.contains("1/2")));

        let result = placement.confirm(&view(GroupColor::Host, 0, &[0, 1]));
        assert!(result.is_err());
    }
}
