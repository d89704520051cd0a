//! Ordered dirty set flushed once per frame, shallowest instances first.
//!
//! While a flush is running the scheduler tracks a depth window: the depth of
//! the entry currently being rebuilt. Work requested at or below the window is
//! folded into the running flush; work requested above it has missed its slot
//! and is deferred to the next flush.

use std::collections::BTreeSet;

use crate::arena::InstanceId;
use crate::collections::map::HashMap;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
struct Slot {
    depth: usize,
    sequence: u64,
    id: InstanceId,
}

/// Outcome of asking the scheduler to rebuild an instance.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Scheduled {
    Queued,
    AlreadyQueued,
    /// The running flush already passed this depth.
    Deferred,
}

#[derive(Default)]
pub(crate) struct Scheduler {
    queue: BTreeSet<Slot>,
    index: HashMap<InstanceId, Slot>,
    deferred: Vec<InstanceId>,
    next_sequence: u64,
    window: Option<usize>,
}

impl Scheduler {
    pub(crate) fn schedule(&mut self, id: InstanceId, depth: usize) -> Scheduled {
        if self.index.contains_key(&id) || self.deferred.contains(&id) {
            return Scheduled::AlreadyQueued;
        }
        if self.window.is_some_and(|window| depth < window) {
            self.deferred.push(id);
            return Scheduled::Deferred;
        }
        let slot = Slot {
            depth,
            sequence: self.next_sequence,
            id,
        };
        self.next_sequence += 1;
        self.queue.insert(slot);
        self.index.insert(id, slot);
        Scheduled::Queued
    }

    /// Parks `id` for the next flush regardless of its depth.
    pub(crate) fn defer(&mut self, id: InstanceId) -> Scheduled {
        if self.contains(id) {
            return Scheduled::AlreadyQueued;
        }
        self.deferred.push(id);
        Scheduled::Deferred
    }

    pub(crate) fn remove(&mut self, id: InstanceId) -> bool {
        if let Some(slot) = self.index.remove(&id) {
            self.queue.remove(&slot);
            return true;
        }
        if let Some(position) = self.deferred.iter().position(|entry| *entry == id) {
            self.deferred.remove(position);
            return true;
        }
        false
    }

    /// Opens the flush window and hands back the entries deferred by the
    /// previous flush so the caller can queue them at their current depth.
    pub(crate) fn begin(&mut self) -> Vec<InstanceId> {
        self.window = Some(0);
        std::mem::take(&mut self.deferred)
    }

    pub(crate) fn pop_next(&mut self) -> Option<(InstanceId, usize)> {
        let slot = self.queue.pop_first()?;
        self.index.remove(&slot.id);
        self.window = Some(slot.depth);
        Some((slot.id, slot.depth))
    }

    pub(crate) fn end(&mut self) {
        self.window = None;
    }

    #[inline]
    pub(crate) fn is_flushing(&self) -> bool {
        self.window.is_some()
    }

    pub(crate) fn contains(&self, id: InstanceId) -> bool {
        self.index.contains_key(&id) || self.deferred.contains(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len() + self.deferred.len()
    }

    pub(crate) fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.index.clear();
        self.deferred.clear();
        self.window = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    fn ids(count: usize) -> Vec<InstanceId> {
        let mut arena = Arena::default();
        (0..count).map(|n| arena.insert(n)).collect()
    }

    #[test]
    fn pops_shallowest_first_then_in_request_order() {
        let ids = ids(4);
        let mut scheduler = Scheduler::default();
        scheduler.schedule(ids[0], 3);
        scheduler.schedule(ids[1], 1);
        scheduler.schedule(ids[2], 2);
        scheduler.schedule(ids[3], 1);

        scheduler.begin();
        let order: Vec<_> = std::iter::from_fn(|| scheduler.pop_next())
            .map(|(id, _)| id)
            .collect();
        assert_eq!(order, vec![ids[1], ids[3], ids[2], ids[0]]);
    }

    #[test]
    fn duplicates_are_ignored() {
        let ids = ids(1);
        let mut scheduler = Scheduler::default();
        assert_eq!(scheduler.schedule(ids[0], 2), Scheduled::Queued);
        assert_eq!(scheduler.schedule(ids[0], 2), Scheduled::AlreadyQueued);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn work_above_the_window_is_deferred() {
        let ids = ids(3);
        let mut scheduler = Scheduler::default();
        scheduler.schedule(ids[0], 2);
        scheduler.begin();
        assert_eq!(scheduler.pop_next(), Some((ids[0], 2)));

        assert_eq!(scheduler.schedule(ids[1], 1), Scheduled::Deferred);
        assert_eq!(scheduler.schedule(ids[2], 2), Scheduled::Queued);
        assert_eq!(scheduler.pop_next(), Some((ids[2], 2)));
        assert_eq!(scheduler.pop_next(), None);
        scheduler.end();

        assert_eq!(scheduler.deferred_len(), 1);
        assert_eq!(scheduler.begin(), vec![ids[1]]);
        assert_eq!(scheduler.deferred_len(), 0);
    }

    #[test]
    fn explicit_deferral_ignores_the_window() {
        let ids = ids(2);
        let mut scheduler = Scheduler::default();
        scheduler.begin();
        assert_eq!(scheduler.defer(ids[0]), Scheduled::Deferred);
        assert_eq!(scheduler.defer(ids[0]), Scheduled::AlreadyQueued);
        assert_eq!(scheduler.schedule(ids[0], 4), Scheduled::AlreadyQueued);
        assert_eq!(scheduler.schedule(ids[1], 4), Scheduled::Queued);
        assert_eq!(scheduler.pop_next(), Some((ids[1], 4)));
        assert_eq!(scheduler.pop_next(), None);
        scheduler.end();
        assert_eq!(scheduler.begin(), vec![ids[0]]);
    }

    #[test]
    fn removal_covers_queued_and_deferred_entries() {
        let ids = ids(3);
        let mut scheduler = Scheduler::default();
        scheduler.schedule(ids[0], 5);
        scheduler.schedule(ids[1], 3);
        scheduler.begin();
        assert_eq!(scheduler.pop_next(), Some((ids[1], 3)));
        assert_eq!(scheduler.schedule(ids[2], 0), Scheduled::Deferred);

        assert!(scheduler.remove(ids[0]));
        assert!(scheduler.remove(ids[2]));
        assert!(!scheduler.remove(ids[2]));
        assert!(!scheduler.contains(ids[0]));
        assert_eq!(scheduler.len(), 0);
    }
}
