//! Property-based test generators using proptest.
//!
//! Strategies produce catalogs that keep the server's invariants: unique
//! ids, tag members that exist, and event chains linked by `nextEventId`.

use crate::catalog::Catalog;
use crate::fixtures::{channel, event_chain, tag, NOW};
use proptest::prelude::*;
use tvhsync_protocol::HtspMessage;

/// Strategy for channel display names.
pub fn channel_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][A-Za-z0-9 ]{0,15}").expect("Invalid regex")
}

/// Strategy for a line-up of channels with distinct ids.
pub fn lineup_strategy(max: usize) -> impl Strategy<Value = Vec<HtspMessage>> {
    prop::collection::btree_set(1u32..5000, 1..=max.max(1))
        .prop_flat_map(|ids| {
            let ids: Vec<u32> = ids.into_iter().collect();
            let names = prop::collection::vec(channel_name_strategy(), ids.len());
            (Just(ids), names)
        })
        .prop_map(|(ids, names)| {
            ids.into_iter()
                .zip(names)
                .enumerate()
                .map(|(i, (id, name))| channel(id, &name, i as i64 + 1))
                .collect()
        })
}

/// Strategy for a catalog with channels, one tag over a subset of them,
/// and an event chain per channel.
pub fn catalog_strategy(max_channels: usize) -> impl Strategy<Value = Catalog> {
    lineup_strategy(max_channels)
        .prop_flat_map(|channels| {
            let len = channels.len();
            (
                Just(channels),
                prop::collection::vec(any::<bool>(), len),
                prop::collection::vec(0u32..4, len),
            )
        })
        .prop_map(|(channels, in_tag, chain_lengths)| {
            let members: Vec<u32> = channels
                .iter()
                .zip(&in_tag)
                .filter(|(_, member)| **member)
                .filter_map(|(c, _)| c.u32("channelId"))
                .collect();
            let mut catalog = Catalog::new();
            for (index, (channel, length)) in channels.into_iter().zip(chain_lengths).enumerate() {
                let Some(id) = channel.u32("channelId") else {
                    continue;
                };
                let first = 10_000 + index as u32 * 10;
                catalog.events.extend(event_chain(id, first, NOW, length));
                catalog.channels.push(channel);
            }
            catalog.tags.push(tag(1, "Generated", &members));
            catalog
        })
}
