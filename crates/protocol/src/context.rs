//! Per-process coordination context.

use crate::ProtocolConfig;
use cosim_core::CollectiveChannel;
use cosim_types::{GroupColor, Rank};
use tracing::{info_span, Span};

/// Who this process is and how it was configured.
///
/// Constructed once at startup and passed explicitly to every protocol
/// step. The span tags every log line emitted by the protocol with the
/// rank and color of the process.
#[derive(Debug, Clone)]
pub struct CoordinationContext {
    rank: Rank,
    size: usize,
    color: GroupColor,
    config: ProtocolConfig,
    span: Span,
}

impl CoordinationContext {
    pub fn new(rank: Rank, size: usize, color: GroupColor, config: ProtocolConfig) -> Self {
        let span = info_span!("cosim", rank = rank.0, color = %color);
        Self {
            rank,
            size,
            color,
            config,
            span,
        }
    }

    /// Build a context for the process behind `channel`.
    pub fn for_channel<C: CollectiveChannel + ?Sized>(
        channel: &C,
        color: GroupColor,
        config: ProtocolConfig,
    ) -> Self {
        Self::new(channel.rank(), channel.size(), color, config)
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of processes in the job.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn color(&self) -> GroupColor {
        self.color
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}
