//! Visited-node tracking for one search.

use crate::tuple::NodeId;
use std::collections::HashSet;

/// The set of node ids touched during a single search. Node ids hash as
/// single 64-bit words, so a plain hash set is enough.
pub(crate) struct VisitedSet {
    set: HashSet<NodeId>,
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl VisitedSet {
    pub(crate) fn new() -> Self {
        Self {
            set: HashSet::with_capacity(128),
        }
    }

    /// Inserts the id, returning `true` when it was not yet present.
    pub(crate) fn insert(&mut self, id: NodeId) -> bool {
        self.set.insert(id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.set.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup() {
        let mut visited = VisitedSet::new();
        assert!(visited.insert(NodeId::new(1, 1)));
        assert!(visited.insert(NodeId::new(1, 2)));
        assert!(!visited.insert(NodeId::new(1, 1)));
        assert_eq!(visited.len(), 2);
    }
}
