//! Local mutation patches and the coalescing merger.
//!
//! DESIGN
//! ======
//! Every local mutation appends one `Patch` to its entity type's patch log.
//! Before sending, `merge_sequence` collapses runs of consecutive `Mod`
//! patches for the same id into one. The pass is greedy and strictly
//! order-preserving: a patch for a different id ends the run, so later
//! patches for the first id are not folded into earlier ones even though
//! they target the same entity. `Add` and `Del` never merge with anything.

use crate::diff::Delta;
use crate::model::EntityId;

/// A create, update or delete of one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<E> {
    Add { id: EntityId, entity: E },
    Mod { id: EntityId, partial: Delta },
    Del { id: EntityId },
}

impl<E> Patch<E> {
    #[must_use]
    pub fn id(&self) -> EntityId {
        match self {
            Self::Add { id, .. } | Self::Mod { id, .. } | Self::Del { id } => *id,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Mod { .. } => "mod",
            Self::Del { .. } => "del",
        }
    }
}

/// Merge two patches if both are `Mod` for the same id. `b`'s leaves win.
#[must_use]
pub fn merge_two<E>(a: &Patch<E>, b: &Patch<E>) -> Option<Patch<E>> {
    match (a, b) {
        (Patch::Mod { id: a_id, partial: a_partial }, Patch::Mod { id: b_id, partial: b_partial })
            if a_id == b_id =>
        {
            let mut partial = a_partial.clone();
            partial.merge(b_partial);
            Some(Patch::Mod { id: *a_id, partial })
        }
        _ => None,
    }
}

/// Coalesce consecutive same-id `Mod` patches, preserving order.
#[must_use]
pub fn merge_sequence<E>(patches: Vec<Patch<E>>) -> Vec<Patch<E>> {
    let mut merged = Vec::with_capacity(patches.len());
    let mut pending: Option<Patch<E>> = None;

    for next in patches {
        pending = Some(match pending.take() {
            None => next,
            Some(current) => {
                if let Some(combined) = merge_two(&current, &next) {
                    combined
                } else {
                    merged.push(current);
                    next
                }
            }
        });
    }

    merged.extend(pending);
    merged
}

#[cfg(test)]
#[path = "patch_test.rs"]
mod patch_test;
