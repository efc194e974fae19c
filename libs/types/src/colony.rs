//! Colonies
//!
//! A colony describes where one bee's durable state lives: the replica bees
//! (leader first) and a monotonic generation epoch bumped on every
//! leadership or migration change. A transaction records the generation it
//! began under; commit is refused when the epochs no longer match.

use crate::identity::BeeId;
use serde::{Deserialize, Serialize};

/// One bee's replica set plus generation epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Colony {
    /// Monotonic epoch, bumped on leadership/migration change.
    pub generation: u64,
    /// Replica bees holding this state, leader first. Each member's `hive`
    /// field is the endpoint replication connects to.
    pub members: Vec<BeeId>,
}

impl Colony {
    /// Colony with the given members at generation zero.
    pub fn new(members: Vec<BeeId>) -> Self {
        Self {
            generation: 0,
            members,
        }
    }

    /// Single-member colony for an unreplicated bee.
    pub fn solo(leader: BeeId) -> Self {
        Self::new(vec![leader])
    }

    /// The leading replica, if the colony is non-empty.
    pub fn leader(&self) -> Option<&BeeId> {
        self.members.first()
    }

    /// Number of replicas holding this bee's state.
    pub fn replica_count(&self) -> usize {
        self.members.len()
    }

    /// Whether both colonies name the same replica group. Ownership in the
    /// lock table is keyed by membership; epochs may advance between
    /// requests without transferring ownership.
    pub fn same_group(&self, other: &Colony) -> bool {
        self.members == other.members
    }

    /// Bump the epoch; invalidates transactions begun under the old one.
    pub fn advance_generation(&mut self) {
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bee(id: u64) -> BeeId {
        BeeId::new("hive-1", "Counter", id)
    }

    #[test]
    fn solo_colony_has_one_member_at_generation_zero() {
        let colony = Colony::solo(bee(7));
        assert_eq!(colony.generation, 0);
        assert_eq!(colony.replica_count(), 1);
        assert_eq!(colony.leader(), Some(&bee(7)));
    }

    #[test]
    fn same_group_ignores_generation() {
        let a = Colony::solo(bee(7));
        let mut b = Colony::solo(bee(7));
        b.advance_generation();
        assert!(a.same_group(&b));
        assert!(!a.same_group(&Colony::solo(bee(8))));
    }
}
