//! Event storage.
//!
//! Provides the `EventStore` trait the emitter reads the DAG through, and an
//! in-memory implementation that tracks, per epoch, every stored event, the
//! current heads (events with no known child) and each creator's last event.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::consensus::event::{Epoch, Event, EventHeader, EventId, Seq, ValidatorId};

/// Errors from storage operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("event {0:?} already stored")]
    Duplicate(EventId),
    #[error("parent {parent:?} of event {event:?} not stored")]
    MissingParent { event: EventId, parent: EventId },
    #[error("storage I/O error: {0}")]
    Io(String),
}

/// Read access to the local DAG view.
pub trait EventStore: Send + Sync {
    /// Events of the epoch with no known descendant.
    fn heads(&self, epoch: Epoch) -> Result<Vec<EventId>, StoreError>;
    /// The creator's highest-seq event in the epoch.
    fn last_event(&self, epoch: Epoch, creator: &ValidatorId)
        -> Result<Option<EventId>, StoreError>;
    fn event_header(&self, epoch: Epoch, id: &EventId) -> Result<Option<EventHeader>, StoreError>;
}

#[derive(Debug, Default)]
struct EpochDag {
    events: HashMap<EventId, Event>,
    heads: BTreeSet<EventId>,
    last: HashMap<ValidatorId, (EventId, Seq)>,
}

/// In-memory event store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    epochs: RwLock<HashMap<Epoch, EpochDag>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Epoch, EpochDag>> {
        self.epochs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Epoch, EpochDag>> {
        self.epochs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an event whose parents are already stored, updating heads.
    pub fn put_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut epochs = self.write();
        let dag = epochs.entry(event.header.epoch).or_default();

        if dag.events.contains_key(&event.id) {
            return Err(StoreError::Duplicate(event.id));
        }
        for parent in event.header.parents.iter().filter(|p| !p.is_zero()) {
            if !dag.events.contains_key(parent) {
                return Err(StoreError::MissingParent {
                    event: event.id,
                    parent: *parent,
                });
            }
        }

        for parent in &event.header.parents {
            dag.heads.remove(parent);
        }
        dag.heads.insert(event.id);

        let creator = event.header.creator;
        let seq = event.header.seq;
        match dag.last.get(&creator) {
            Some(&(_, last_seq)) if last_seq >= seq => {}
            _ => {
                dag.last.insert(creator, (event.id, seq));
            }
        }

        dag.events.insert(event.id, event.clone());
        Ok(())
    }

    /// Get a full event by ID.
    pub fn get_event(&self, epoch: Epoch, id: &EventId) -> Option<Event> {
        self.read()
            .get(&epoch)
            .and_then(|dag| dag.events.get(id))
            .cloned()
    }

    pub fn has_event(&self, epoch: Epoch, id: &EventId) -> bool {
        self.read()
            .get(&epoch)
            .is_some_and(|dag| dag.events.contains_key(id))
    }

    /// Number of events stored for the epoch.
    pub fn len(&self, epoch: Epoch) -> usize {
        self.read().get(&epoch).map(|dag| dag.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, epoch: Epoch) -> bool {
        self.len(epoch) == 0
    }

    /// Drop everything stored for an epoch.
    pub fn prune_epoch(&self, epoch: Epoch) {
        self.write().remove(&epoch);
    }
}

impl EventStore for MemoryStore {
    fn heads(&self, epoch: Epoch) -> Result<Vec<EventId>, StoreError> {
        Ok(self
            .read()
            .get(&epoch)
            .map(|dag| dag.heads.iter().copied().collect())
            .unwrap_or_default())
    }

    fn last_event(
        &self,
        epoch: Epoch,
        creator: &ValidatorId,
    ) -> Result<Option<EventId>, StoreError> {
        Ok(self
            .read()
            .get(&epoch)
            .and_then(|dag| dag.last.get(creator))
            .map(|&(id, _)| id))
    }

    fn event_header(&self, epoch: Epoch, id: &EventId) -> Result<Option<EventHeader>, StoreError> {
        Ok(self
            .read()
            .get(&epoch)
            .and_then(|dag| dag.events.get(id))
            .map(|e| e.header.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::event::Timestamp;

    fn make_event(creator: u8, seq: Seq, parents: Vec<EventId>) -> Event {
        let mut e = Event::new(EventHeader {
            epoch: 1,
            seq,
            creator: [creator; 32],
            parents,
            lamport: seq,
            claimed_time: Timestamp(seq as u64),
            ..Default::default()
        });
        e.recache_hash();
        e
    }

    #[test]
    fn heads_follow_inserts() {
        let store = MemoryStore::new();
        let a1 = make_event(1, 1, vec![]);
        let b1 = make_event(2, 1, vec![]);
        store.put_event(&a1).unwrap();
        store.put_event(&b1).unwrap();

        let mut heads = store.heads(1).unwrap();
        heads.sort();
        let mut expected = vec![a1.id, b1.id];
        expected.sort();
        assert_eq!(heads, expected);

        // Diamond merge
        let a2 = make_event(1, 2, vec![a1.id, b1.id]);
        store.put_event(&a2).unwrap();
        assert_eq!(store.heads(1).unwrap(), vec![a2.id]);
    }

    #[test]
    fn last_event_tracks_highest_seq() {
        let store = MemoryStore::new();
        let a1 = make_event(1, 1, vec![]);
        let a2 = make_event(1, 2, vec![a1.id]);
        store.put_event(&a1).unwrap();
        store.put_event(&a2).unwrap();
        assert_eq!(store.last_event(1, &[1u8; 32]).unwrap(), Some(a2.id));
        assert_eq!(store.last_event(1, &[2u8; 32]).unwrap(), None);
        assert_eq!(store.last_event(2, &[1u8; 32]).unwrap(), None);
    }

    #[test]
    fn missing_parent_rejected() {
        let store = MemoryStore::new();
        let e = make_event(1, 2, vec![EventId([9u8; 32])]);
        assert!(matches!(
            store.put_event(&e),
            Err(StoreError::MissingParent { .. })
        ));
        assert!(store.is_empty(1));
    }

    #[test]
    fn duplicate_rejected() {
        let store = MemoryStore::new();
        let e = make_event(1, 1, vec![]);
        store.put_event(&e).unwrap();
        assert_eq!(store.put_event(&e), Err(StoreError::Duplicate(e.id)));
    }

    #[test]
    fn header_lookup_is_epoch_scoped() {
        let store = MemoryStore::new();
        let e = make_event(1, 1, vec![]);
        store.put_event(&e).unwrap();
        assert_eq!(store.event_header(1, &e.id).unwrap(), Some(e.header.clone()));
        assert_eq!(store.event_header(2, &e.id).unwrap(), None);
        assert!(store.has_event(1, &e.id));

        store.prune_epoch(1);
        assert!(!store.has_event(1, &e.id));
    }
}
