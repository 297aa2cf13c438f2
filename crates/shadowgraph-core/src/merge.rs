use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::wire::NodeRecord;
use crate::{Anchor, AnchorStatus, GraphError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    KeepLocal,
    TakeIncoming,
    Identical,
}

/// Last-write-wins between two versions of the same node.
///
/// The later `created_at` wins; equal timestamps fall back to the
/// lexicographically greater `sync_id`. The rule is symmetric, so two
/// replicas merging each other settle on the same winner.
///
/// # Errors
/// Returns [`GraphError::AmbiguousMerge`] when timestamps and sync ids are
/// equal but the payloads differ. Callers keep the local version.
pub fn last_write_wins(
    local: &NodeRecord,
    incoming: &NodeRecord,
) -> Result<MergeOutcome, GraphError> {
    let order = incoming
        .created_at
        .cmp(&local.created_at)
        .then_with(|| incoming.sync_id.cmp(&local.sync_id));

    match order {
        Ordering::Greater => Ok(MergeOutcome::TakeIncoming),
        Ordering::Less => Ok(MergeOutcome::KeepLocal),
        Ordering::Equal if local.same_payload(incoming) => Ok(MergeOutcome::Identical),
        Ordering::Equal => Err(GraphError::AmbiguousMerge { key: local.id.to_string() }),
    }
}

/// Merge two versions of the anchor for one `(file_path, symbol)` pair.
///
/// The winner is picked on `(content_hash, start_line, previous_hash,
/// node_id)` and never on status, so folding any number of versions gives
/// the same anchor in any order. The result is stale when either side is
/// stale or the two disagree on the hash.
#[must_use]
pub fn merge_anchor(local: &Anchor, incoming: &Anchor) -> Anchor {
    let rank = |anchor: &Anchor| {
        (
            anchor.content_hash.clone(),
            anchor.start_line,
            anchor.previous_hash.clone(),
            anchor.node_id.clone(),
        )
    };
    let winner = if rank(incoming) > rank(local) { incoming } else { local };
    let stale = local.status == AnchorStatus::Stale
        || incoming.status == AnchorStatus::Stale
        || local.content_hash != incoming.content_hash;

    Anchor {
        status: if stale { AnchorStatus::Stale } else { AnchorStatus::Valid },
        ..winner.clone()
    }
}
