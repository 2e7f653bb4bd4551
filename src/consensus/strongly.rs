//! Strongly-see engine.
//!
//! Event A strongly sees event B when, for a supermajority (by weight) of
//! validators `n`, the earliest event of `n` descending from B is already an
//! ancestor of A:
//!
//! ```text
//! B.lowest_sees[n] != 0  &&  B.lowest_sees[n] <= A.highest_seen[n]
//! ```
//!
//! Comparing the two vectors costs O(validators), independent of DAG size.
//! The engine holds no cross-epoch state; `reset` must be called on every
//! epoch change.

use std::collections::HashMap;

use crate::consensus::ancestry::{AncestryError, AncestryRecord, AncestryStore, VectorClock};
use crate::consensus::event::{Event, EventId, Seq, ValidatorId};
use crate::consensus::members::Members;

/// Strongly-see index for one epoch.
#[derive(Debug)]
pub struct StronglySee {
    members: Members,
    /// Creator slots in first-seen order, bounded by the member count
    slots: HashMap<ValidatorId, usize>,
    store: AncestryStore,
}

impl StronglySee {
    pub fn new(members: Members) -> Self {
        let mut ss = StronglySee {
            members: Members::default(),
            slots: HashMap::new(),
            store: AncestryStore::default(),
        };
        ss.reset(members);
        ss
    }

    /// Clear all records and bind a new validator set.
    pub fn reset(&mut self, members: Members) {
        self.slots = HashMap::with_capacity(members.len());
        self.store.reset(members.len());
        self.members = members;
    }

    pub fn members(&self) -> &Members {
        &self.members
    }

    /// Number of indexed events.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn contains(&self, event: &EventId) -> bool {
        self.store.contains(event)
    }

    /// Slot assigned to a creator, if it has been observed this epoch.
    pub fn creator_slot(&self, creator: &ValidatorId) -> Option<usize> {
        self.slots.get(creator).copied()
    }

    pub fn record(&self, event: &EventId) -> Option<&AncestryRecord> {
        self.store.get(event)
    }

    /// Index an event. Its parents must already be indexed.
    ///
    /// Every error is fatal for the epoch's index: it means the caller
    /// broke the parents-first contract, fed an event twice, or accepted
    /// an event from outside the validator set.
    pub fn add(&mut self, event: &Event) -> Result<(), AncestryError> {
        let creator = event.header.creator;
        if !self.members.contains(&creator) {
            return Err(AncestryError::UnknownCreator {
                event: event.id,
                creator,
            });
        }

        let slot = self.slots.get(&creator).copied().unwrap_or(self.slots.len());
        self.store
            .insert(event.id, event.header.seq, slot, &event.header.parents)?;
        self.slots.entry(creator).or_insert(slot);
        Ok(())
    }

    /// Does `who` strongly see `whom`? Unindexed events see nothing.
    pub fn see(&self, who: &EventId, whom: &EventId) -> bool {
        match (self.store.get(who), self.store.get(whom)) {
            (Some(a), Some(b)) => self.sufficient_coherence(a, b),
            _ => false,
        }
    }

    fn sufficient_coherence(&self, event1: &AncestryRecord, event2: &AncestryRecord) -> bool {
        let mut counter = self.members.new_counter();
        for validator in self.members.iter() {
            // A validator with no events this epoch cannot vouch for anything.
            let Some(&n) = self.slots.get(&validator.id) else {
                continue;
            };
            let lowest = event2.lowest_sees[n];
            if lowest != 0 && lowest <= event1.highest_seen[n] {
                counter.count(&validator.id);
                if counter.has_quorum() {
                    return true;
                }
            }
        }
        counter.has_quorum()
    }
}

impl VectorClock for StronglySee {
    fn highest_seen(&self, event: &EventId) -> Option<&[Seq]> {
        self.store.highest_seen(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::event::{EventHeader, Timestamp};
    use crate::consensus::members::Validator;
    use crate::crypto::keys::SigningKeypair;

    fn members(n: usize) -> Members {
        Members::new((0..n).map(|_| Validator::new(SigningKeypair::generate().public, 1)))
    }

    fn event(creator: ValidatorId, seq: Seq, parents: &[&Event]) -> Event {
        let header = EventHeader {
            epoch: 1,
            seq,
            creator,
            parents: parents.iter().map(|p| p.id).collect(),
            lamport: parents.iter().map(|p| p.header.lamport).max().unwrap_or(0) + 1,
            claimed_time: Timestamp(seq as u64),
            ..Default::default()
        };
        let mut e = Event::new(header);
        e.recache_hash();
        e
    }

    #[test]
    fn unknown_events_see_nothing() {
        let mm = members(4);
        let ss = StronglySee::new(mm);
        assert!(!ss.see(&EventId([1u8; 32]), &EventId([2u8; 32])));
    }

    #[test]
    fn slots_assigned_in_first_seen_order() {
        let mm = members(3);
        let ids: Vec<_> = mm.iter().map(|v| v.id).collect();
        let mut ss = StronglySee::new(mm);

        let c1 = event(ids[2], 1, &[]);
        let a1 = event(ids[0], 1, &[]);
        ss.add(&c1).unwrap();
        ss.add(&a1).unwrap();

        assert_eq!(ss.creator_slot(&ids[2]), Some(0));
        assert_eq!(ss.creator_slot(&ids[0]), Some(1));
        assert_eq!(ss.creator_slot(&ids[1]), None);
    }

    #[test]
    fn failed_add_does_not_claim_a_slot() {
        let mm = members(2);
        let ids: Vec<_> = mm.iter().map(|v| v.id).collect();
        let mut ss = StronglySee::new(mm);

        let orphan = event(ids[1], 2, &[]);
        let mut bad = orphan.clone();
        bad.header.parents = vec![EventId([42u8; 32])];
        bad.recache_hash();
        assert!(matches!(
            ss.add(&bad),
            Err(AncestryError::MissingParent { .. })
        ));
        assert_eq!(ss.creator_slot(&ids[1]), None);
    }

    #[test]
    fn outsider_rejected() {
        let mut ss = StronglySee::new(members(2));
        let e = event([9u8; 32], 1, &[]);
        assert!(matches!(
            ss.add(&e),
            Err(AncestryError::UnknownCreator { .. })
        ));
        assert!(ss.is_empty());
    }

    #[test]
    fn duplicate_rejected() {
        let mm = members(1);
        let a = mm.iter().next().unwrap().id;
        let mut ss = StronglySee::new(mm);
        let e = event(a, 1, &[]);
        ss.add(&e).unwrap();
        assert_eq!(ss.add(&e), Err(AncestryError::Duplicate(e.id)));
    }

    #[test]
    fn reset_clears_everything() {
        let mm = members(2);
        let a = mm.iter().next().unwrap().id;
        let mut ss = StronglySee::new(mm.clone());
        let e = event(a, 1, &[]);
        ss.add(&e).unwrap();

        ss.reset(mm);
        assert!(ss.is_empty());
        assert!(!ss.contains(&e.id));
        assert_eq!(ss.creator_slot(&a), None);
        ss.add(&e).unwrap();
    }
}
