//! Rank discovery.
//!
//! From only its own rank and color, each process learns its group, its
//! position inside the group, and the roots of both groups. Exactly one
//! collective is issued: every rank announces its color in a count exchange,
//! which doubles as the gather of every rank sharing a color.

use crate::{CoordinationContext, CoordinationError, RootDiscovery, TopologyError};
use cosim_core::CollectiveChannel;
use cosim_types::{GroupColor, GroupLayout, GroupView, Rank};
use tracing::{debug, info};

/// Discover the group layout of the calling process.
///
/// Collective: every process of the job must call this exactly once, before
/// the handshake.
pub fn discover<C: CollectiveChannel + ?Sized>(
    ctx: &CoordinationContext,
    channel: &mut C,
) -> Result<GroupLayout, CoordinationError> {
    let _guard = ctx.span().enter();

    let announced = channel.exchange_counts(ctx.color().as_u32())?;
    let colors = announced
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            GroupColor::from_u32(value).ok_or(TopologyError::UnknownColor {
                rank: Rank::from(index),
                value,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ranks_of = |wanted: GroupColor| -> Vec<Rank> {
        colors
            .iter()
            .enumerate()
            .filter(|(_, color)| **color == wanted)
            .map(|(index, _)| Rank::from(index))
            .collect()
    };
    let own_ranks = ranks_of(ctx.color());
    let peer_ranks = ranks_of(ctx.color().peer());

    let peer_min = peer_ranks
        .iter()
        .min()
        .copied()
        .ok_or(TopologyError::MissingGroup(ctx.color().peer()))?;

    let view =
        GroupView::new(ctx.color(), ctx.rank(), own_ranks).map_err(TopologyError::from)?;
    let own_root = view.min_rank();

    let peer_root = match ctx.config().root_discovery {
        RootDiscovery::Announced => peer_min,
        RootDiscovery::Contiguous => {
            let candidate = contiguous_peer_root(&view);
            if !peer_ranks.contains(&candidate) {
                return Err(TopologyError::UnsupportedLayout {
                    color: ctx.color(),
                    peer_root: candidate,
                }
                .into());
            }
            candidate
        }
    };

    debug!(
        members = ?view.members(),
        local_rank = view.local_rank(),
        "Group membership gathered"
    );
    info!(
        own_root = own_root.0,
        peer_root = peer_root.0,
        group_size = view.size(),
        peer_size = peer_ranks.len(),
        "Rank topology discovered"
    );

    Ok(GroupLayout::new(
        ctx.rank(),
        channel.size(),
        view,
        own_root,
        peer_root,
    ))
}

/// Peer root by the first-gap rule.
///
/// Only the group whose smallest rank is 0 looks for a gap; the other group's
/// peer root is rank 0.
pub fn contiguous_peer_root(view: &GroupView) -> Rank {
    if view.min_rank() != Rank::ZERO {
        return Rank::ZERO;
    }
    view.members()
        .windows(2)
        .find(|pair| pair[1].0 - pair[0].0 != 1)
        .map(|pair| pair[0].next())
        .unwrap_or_else(|| view.max_rank().next())
}
