//! Canonicalization of cross-event citations.
//!
//! Normalization is a pure function and a fixed point: normalizing an
//! already-normalized list returns it unchanged.

use std::collections::BTreeMap;

use contracts::{EventId, Reference};

/// Canonicalize a reference list: absent weights stay at the neutral
/// default, duplicate event ids are merged keeping the component-wise
/// maximum weight, and first-occurrence order is preserved.
pub fn normalize_references(references: &[Reference]) -> Vec<Reference> {
    let mut order = Vec::<EventId>::new();
    let mut merged = BTreeMap::<EventId, Reference>::new();

    for reference in references {
        match merged.get_mut(&reference.event_id) {
            Some(existing) => {
                existing.weight = existing.weight.component_max(reference.weight);
            }
            None => {
                order.push(reference.event_id);
                merged.insert(reference.event_id, reference.clone());
            }
        }
    }

    order
        .into_iter()
        .filter_map(|event_id| merged.remove(&event_id))
        .collect()
}
