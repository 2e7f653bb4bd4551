//! Ancestry store: per-event `LowestSees` / `HighestSeen` vectors.
//!
//! Records live in an arena indexed by a dense `RecordId` assigned at insert
//! time; parent links are stored as record ids, so back-propagation is a plain
//! work-list walk over integers.
//!
//! For a record `r` and creator slot `n`:
//! - `highest_seen[n]` is the largest seq of `n`'s events that are ancestors
//!   of `r` (inclusive of `r` itself), 0 if none.
//! - `lowest_sees[n]` is the smallest seq of `n`'s events known to be
//!   descendants of `r`, 0 if none yet. In the creator's own slot the record
//!   is seeded with its own seq, which the first self-descendant replaces.
//!
//! The store does no locking; callers serialize inserts.

use std::collections::{HashMap, HashSet};

use crate::consensus::event::{EventId, Seq};
use crate::Hash;

/// Dense arena index of an ancestry record.
pub type RecordId = usize;

/// Errors from ancestry inserts. All of them mean the caller broke the
/// parents-before-children contract or fed an event twice.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AncestryError {
    #[error("event {0:?} already indexed")]
    Duplicate(EventId),
    #[error("parent {parent:?} of event {event:?} is not indexed")]
    MissingParent { event: EventId, parent: EventId },
    #[error("creator slot {slot} out of range (width {width})")]
    SlotOutOfRange { slot: usize, width: usize },
    #[error("creator of event {event:?} is not a member of the epoch")]
    UnknownCreator { event: EventId, creator: Hash },
}

/// Read access to per-event vector clocks, used by parent selection.
pub trait VectorClock {
    /// `highest_seen` of an indexed event, by creator slot.
    fn highest_seen(&self, event: &EventId) -> Option<&[Seq]>;
}

/// Ancestry summary of one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AncestryRecord {
    pub event: EventId,
    pub seq: Seq,
    pub creator_slot: usize,
    pub parents: Vec<RecordId>,
    pub lowest_sees: Vec<Seq>,
    pub highest_seen: Vec<Seq>,
}

impl AncestryRecord {
    fn new(event: EventId, seq: Seq, creator_slot: usize, width: usize) -> Self {
        let mut record = AncestryRecord {
            event,
            seq,
            creator_slot,
            parents: Vec::new(),
            lowest_sees: vec![0; width],
            highest_seen: vec![0; width],
        };
        record.lowest_sees[creator_slot] = seq;
        record.highest_seen[creator_slot] = seq;
        record
    }

    /// Lower `lowest_sees[slot]` to `seq` if that is an improvement.
    fn try_lower(&mut self, slot: usize, seq: Seq) -> bool {
        let current = self.lowest_sees[slot];
        let accept = current == 0
            || current > seq
            || (slot == self.creator_slot && current <= self.seq);
        if accept {
            self.lowest_sees[slot] = seq;
        }
        accept
    }

    fn merge_highest(&mut self, other: &[Seq]) {
        for (mine, theirs) in self.highest_seen.iter_mut().zip(other) {
            if *mine < *theirs {
                *mine = *theirs;
            }
        }
    }
}

/// Arena of ancestry records for one epoch.
#[derive(Debug, Default)]
pub struct AncestryStore {
    width: usize,
    records: Vec<AncestryRecord>,
    index: HashMap<EventId, RecordId>,
}

impl AncestryStore {
    /// Create an empty store with `width` creator slots per record.
    pub fn new(width: usize) -> Self {
        AncestryStore {
            width,
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Drop all records and change the slot width.
    pub fn reset(&mut self, width: usize) {
        self.width = width;
        self.records.clear();
        self.index.clear();
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, event: &EventId) -> bool {
        self.index.contains_key(event)
    }

    pub fn get(&self, event: &EventId) -> Option<&AncestryRecord> {
        self.index.get(event).map(|&rid| &self.records[rid])
    }

    pub fn record(&self, rid: RecordId) -> Option<&AncestryRecord> {
        self.records.get(rid)
    }

    /// Index a new event and propagate what it reveals.
    ///
    /// Zero parent ids are skipped. On error the store is left unchanged.
    pub fn insert(
        &mut self,
        event: EventId,
        seq: Seq,
        creator_slot: usize,
        parents: &[EventId],
    ) -> Result<RecordId, AncestryError> {
        if self.index.contains_key(&event) {
            return Err(AncestryError::Duplicate(event));
        }
        if creator_slot >= self.width {
            return Err(AncestryError::SlotOutOfRange {
                slot: creator_slot,
                width: self.width,
            });
        }

        let mut parent_ids = Vec::with_capacity(parents.len());
        for parent in parents.iter().filter(|p| !p.is_zero()) {
            let rid = self
                .index
                .get(parent)
                .copied()
                .ok_or(AncestryError::MissingParent {
                    event,
                    parent: *parent,
                })?;
            parent_ids.push(rid);
        }

        let mut record = AncestryRecord::new(event, seq, creator_slot, self.width);
        for &pid in &parent_ids {
            record.merge_highest(&self.records[pid].highest_seen);
        }
        record.parents = parent_ids.clone();

        let rid = self.records.len();
        self.records.push(record);
        self.index.insert(event, rid);

        self.propagate_lowest(&parent_ids, creator_slot, seq);
        Ok(rid)
    }

    /// Push `lowest_sees[slot] = seq` into every ancestor that accepts it,
    /// descending only through accepting records.
    fn propagate_lowest(&mut self, from: &[RecordId], slot: usize, seq: Seq) {
        // A revisit carries the same (slot, seq), so its outcome is already known.
        let mut visited = HashSet::new();
        let mut work: Vec<RecordId> = from.to_vec();
        while let Some(rid) = work.pop() {
            if !visited.insert(rid) {
                continue;
            }
            let record = &mut self.records[rid];
            if record.try_lower(slot, seq) {
                work.extend(record.parents.iter().copied());
            }
        }
    }
}

impl VectorClock for AncestryStore {
    fn highest_seen(&self, event: &EventId) -> Option<&[Seq]> {
        self.get(event).map(|r| r.highest_seen.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> EventId {
        EventId([n; 32])
    }

    #[test]
    fn self_seeding() {
        let mut store = AncestryStore::new(3);
        store.insert(id(1), 1, 2, &[]).unwrap();
        let r = store.get(&id(1)).unwrap();
        assert_eq!(r.lowest_sees, vec![0, 0, 1]);
        assert_eq!(r.highest_seen, vec![0, 0, 1]);
    }

    #[test]
    fn own_slot_replaced_by_first_self_descendant() {
        let mut store = AncestryStore::new(1);
        store.insert(id(1), 1, 0, &[]).unwrap();
        store.insert(id(2), 2, 0, &[id(1)]).unwrap();
        store.insert(id(3), 3, 0, &[id(2)]).unwrap();

        assert_eq!(store.get(&id(1)).unwrap().lowest_sees[0], 2);
        assert_eq!(store.get(&id(2)).unwrap().lowest_sees[0], 3);
        assert_eq!(store.get(&id(3)).unwrap().lowest_sees[0], 3);
        assert_eq!(store.get(&id(3)).unwrap().highest_seen[0], 3);
    }

    #[test]
    fn highest_seen_merges_parents() {
        let mut store = AncestryStore::new(3);
        store.insert(id(1), 1, 0, &[]).unwrap();
        store.insert(id(2), 1, 1, &[]).unwrap();
        store.insert(id(3), 2, 1, &[id(2)]).unwrap();
        store.insert(id(4), 1, 2, &[id(1), id(3)]).unwrap();

        assert_eq!(store.get(&id(4)).unwrap().highest_seen, vec![1, 2, 1]);
    }

    #[test]
    fn lowest_sees_reaches_transitive_ancestors() {
        let mut store = AncestryStore::new(3);
        store.insert(id(1), 1, 0, &[]).unwrap();
        store.insert(id(2), 1, 1, &[id(1)]).unwrap();
        store.insert(id(3), 1, 2, &[id(2)]).unwrap();
        // Later event of slot 2 must not raise the already-known lowest
        store.insert(id(4), 2, 2, &[id(3)]).unwrap();

        let root = store.get(&id(1)).unwrap();
        assert_eq!(root.lowest_sees, vec![1, 1, 1]);
    }

    #[test]
    fn zero_parent_is_skipped() {
        let mut store = AncestryStore::new(2);
        store.insert(id(1), 1, 0, &[EventId::ZERO]).unwrap();
        assert!(store.get(&id(1)).unwrap().parents.is_empty());
    }

    #[test]
    fn duplicate_rejected() {
        let mut store = AncestryStore::new(1);
        store.insert(id(1), 1, 0, &[]).unwrap();
        assert_eq!(
            store.insert(id(1), 1, 0, &[]),
            Err(AncestryError::Duplicate(id(1)))
        );
    }

    #[test]
    fn missing_parent_leaves_store_untouched() {
        let mut store = AncestryStore::new(2);
        store.insert(id(1), 1, 0, &[]).unwrap();
        let before = store.get(&id(1)).unwrap().clone();

        let result = store.insert(id(2), 1, 1, &[id(1), id(9)]);
        assert_eq!(
            result,
            Err(AncestryError::MissingParent {
                event: id(2),
                parent: id(9)
            })
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&id(1)).unwrap(), &before);
    }

    #[test]
    fn slot_out_of_range() {
        let mut store = AncestryStore::new(2);
        assert!(matches!(
            store.insert(id(1), 1, 2, &[]),
            Err(AncestryError::SlotOutOfRange { slot: 2, width: 2 })
        ));
    }

    #[test]
    fn diamond_propagation_terminates() {
        // 1 <- 2, 1 <- 3, {2,3} <- 4, repeated to build a wide lattice
        let mut store = AncestryStore::new(4);
        store.insert(id(1), 1, 0, &[]).unwrap();
        store.insert(id(2), 1, 1, &[id(1)]).unwrap();
        store.insert(id(3), 1, 2, &[id(1)]).unwrap();
        store.insert(id(4), 1, 3, &[id(2), id(3)]).unwrap();
        store.insert(id(5), 2, 1, &[id(2), id(4)]).unwrap();
        store.insert(id(6), 2, 2, &[id(3), id(4), id(5)]).unwrap();

        let root = store.get(&id(1)).unwrap();
        assert_eq!(root.lowest_sees, vec![1, 1, 1, 1]);
        assert_eq!(store.get(&id(6)).unwrap().highest_seen, vec![1, 2, 2, 1]);
    }
}
