//! Per-entity ordering gate.
//!
//! Account writes must apply in strictly increasing `(slot, write_version)`
//! order per entity; anything late or duplicate is discarded before it is
//! decoded. Each dispatch lane owns one gate, and a key never migrates
//! between lanes, so the map is never shared.

use std::collections::HashMap;

use crate::types::UpdatePosition;

#[derive(Debug, Default)]
pub struct StaleGate {
    last: HashMap<String, UpdatePosition>,
}

impl StaleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `position` for `key` if it is strictly newer than the last
    /// admitted position. Returns `false` for late or duplicate updates.
    pub fn admit(&mut self, key: &str, position: UpdatePosition) -> bool {
        match self.last.get(key) {
            Some(last) if position <= *last => false,
            _ => {
                self.last.insert(key.to_string(), position);
                true
            }
        }
    }

    /// Last admitted position for `key`, if any.
    pub fn last(&self, key: &str) -> Option<UpdatePosition> {
        self.last.get(key).copied()
    }

    /// Number of entities this gate has seen.
    pub fn tracked(&self) -> usize {
        self.last.len()
    }
}
