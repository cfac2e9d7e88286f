//! Arena-backed expiry queue.
//!
//! Entries live in a slot vector and link to their neighbours by slot
//! index, ordered by expiry time (ties keep insertion order). Freed slots
//! are reused. Insertion at a caller-supplied position validates ordering
//! against both neighbours.

use serde::{Deserialize, Serialize};

use keel_core::error::QueueError;

/// Handle to a queue entry. Stale after the entry is removed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
struct Slot<T> {
    expires_at: u64,
    value: T,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ExpiryQueue<T> {
    slots: Vec<Option<Slot<T>>>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl<T> Default for ExpiryQueue<T> {
    fn default() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), head: None, tail: None, len: 0 }
    }
}

impl<T> ExpiryQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slot(&self, id: u32) -> Result<&Slot<T>, QueueError> {
        self.slots
            .get(id as usize)
            .and_then(Option::as_ref)
            .ok_or(QueueError::UnknownSlot(id))
    }

    fn slot_mut(&mut self, id: u32) -> Result<&mut Slot<T>, QueueError> {
        self.slots
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or(QueueError::UnknownSlot(id))
    }

    /// Entry at `slot`, with its expiry time.
    pub fn get(&self, slot: SlotId) -> Option<(u64, &T)> {
        self.slot(slot.0).ok().map(|s| (s.expires_at, &s.value))
    }

    /// Earliest entry.
    pub fn peek(&self) -> Option<(SlotId, u64, &T)> {
        let head = self.head?;
        self.slot(head).ok().map(|s| (SlotId(head), s.expires_at, &s.value))
    }

    /// Insert directly after `after`, or at the front when `None`.
    ///
    /// Fails with [`QueueError::OutOfOrder`] if `expires_at` would sort
    /// before the previous entry or after the next one.
    pub fn insert_after(&mut self, after: Option<SlotId>, expires_at: u64, value: T) -> Result<SlotId, QueueError> {
        let (prev, next) = match after {
            Some(SlotId(p)) => (Some(p), self.slot(p)?.next),
            None => (None, self.head),
        };
        if let Some(p) = prev {
            let at = self.slot(p)?.expires_at;
            if at > expires_at {
                return Err(QueueError::OutOfOrder { at: expires_at, neighbour: at });
            }
        }
        if let Some(n) = next {
            let at = self.slot(n)?.expires_at;
            if at < expires_at {
                return Err(QueueError::OutOfOrder { at: expires_at, neighbour: at });
            }
        }

        Ok(self.link(prev, next, expires_at, value))
    }

    /// Place a new entry between `prev` and `next`, which must be adjacent
    /// live slots (or the queue ends).
    fn link(&mut self, prev: Option<u32>, next: Option<u32>, expires_at: u64, value: T) -> SlotId {
        let slot = Slot { expires_at, value, prev, next };
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id as usize] = Some(slot);
                id
            }
            None => {
                self.slots.push(Some(slot));
                (self.slots.len() - 1) as u32
            }
        };

        match prev.and_then(|p| self.slots[p as usize].as_mut()) {
            Some(p) => p.next = Some(id),
            None => self.head = Some(id),
        }
        match next.and_then(|n| self.slots[n as usize].as_mut()) {
            Some(n) => n.prev = Some(id),
            None => self.tail = Some(id),
        }
        self.len += 1;
        SlotId(id)
    }

    /// Slot a new entry expiring at `expires_at` belongs after: the last
    /// entry with the same or an earlier time, or `None` for the front.
    /// Walks from the back, where new entries usually land.
    pub fn position_for(&self, expires_at: u64) -> Option<SlotId> {
        let mut after = self.tail;
        while let Some(id) = after {
            match self.slot(id) {
                Ok(slot) if slot.expires_at > expires_at => after = slot.prev,
                _ => break,
            }
        }
        after.map(SlotId)
    }

    /// Unlink and return the entry at `slot`.
    pub fn remove(&mut self, slot: SlotId) -> Result<(u64, T), QueueError> {
        let id = slot.0;
        let (prev, next) = {
            let s = self.slot(id)?;
            (s.prev, s.next)
        };
        match prev {
            Some(p) => self.slot_mut(p)?.next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slot_mut(n)?.prev = prev,
            None => self.tail = prev,
        }
        let removed = self.slots[id as usize].take().ok_or(QueueError::UnknownSlot(id))?;
        self.free.push(id);
        self.len -= 1;
        Ok((removed.expires_at, removed.value))
    }

    /// Remove and return every entry expiring at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: u64) -> Vec<(u64, T)> {
        let mut due = Vec::new();
        while let Some(head) = self.head {
            match self.slot(head) {
                Ok(slot) if slot.expires_at <= now => {}
                _ => break,
            }
            match self.remove(SlotId(head)) {
                Ok(entry) => due.push(entry),
                Err(_) => break,
            }
        }
        due
    }

    /// Entries in expiry order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { queue: self, cursor: self.head }
    }
}

pub struct Iter<'a, T> {
    queue: &'a ExpiryQueue<T>,
    cursor: Option<u32>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (SlotId, u64, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let slot = self.queue.slot(id).ok()?;
        self.cursor = slot.next;
        Some((SlotId(id), slot.expires_at, &slot.value))
    }
}
