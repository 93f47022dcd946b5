//! Collective operation kinds.

use std::fmt;

/// The collective operations a transport must provide.
///
/// Transports tag traffic with the operation kind so that a peer issuing a
/// different collective than everyone else is detected instead of silently
/// consuming the wrong payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectiveOp {
    /// One rank's buffer copied to every rank.
    Broadcast,

    /// Every rank's single count gathered on every rank.
    ExchangeCounts,

    /// Every rank's variable-length byte block gathered on every rank.
    ExchangeBytes,
}

impl CollectiveOp {
    /// Get a human-readable name for this operation.
    pub fn type_name(&self) -> &'static str {
        match self {
            CollectiveOp::Broadcast => "broadcast",
            CollectiveOp::ExchangeCounts => "exchange_counts",
            CollectiveOp::ExchangeBytes => "exchange_bytes",
        }
    }

    /// Wire tag of this operation.
    pub fn as_u8(&self) -> u8 {
        match self {
            CollectiveOp::Broadcast => 1,
            CollectiveOp::ExchangeCounts => 2,
            CollectiveOp::ExchangeBytes => 3,
        }
    }

    /// Parse a wire tag. Returns `None` for tags that are not collectives.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(CollectiveOp::Broadcast),
            2 => Some(CollectiveOp::ExchangeCounts),
            3 => Some(CollectiveOp::ExchangeBytes),
            _ => None,
        }
    }
}

impl fmt::Display for CollectiveOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_distinct_and_parse_back() {
        let ops = [
            CollectiveOp::Broadcast,
            CollectiveOp::ExchangeCounts,
            CollectiveOp::ExchangeBytes,
        ];
        for op in ops {
            assert_eq!(CollectiveOp::from_u8(op.as_u8()), Some(op));
        }
        assert_eq!(CollectiveOp::from_u8(0), None);
    }
}
