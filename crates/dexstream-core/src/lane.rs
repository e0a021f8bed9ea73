//! Deterministic lane assignment for the dispatcher.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Map a partition key onto one of `lanes` dispatch lanes.
///
/// The same key always lands on the same lane for the lifetime of the
/// process, which is what keeps per-entity updates in arrival order while
/// distinct entities decode in parallel.
pub fn lane_for(key: &str, lanes: usize) -> usize {
    debug_assert!(lanes > 0);
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}
