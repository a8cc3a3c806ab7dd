//! Session slot table
//!
//! Fixed-capacity registry of in-flight worker processes, indexed by slot
//! number. Lower indices are always handed out first.

use std::net::SocketAddr;
use std::time::Instant;

use thiserror::Error;

use filter_core::{LifecycleState, ProcessId};

/// Errors from slot bookkeeping
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SlotError {
    /// Index outside the table
    #[error("Slot {0} is out of range")]
    OutOfRange(usize),

    /// Slot already holds a session
    #[error("Slot {0} is already occupied")]
    Occupied(usize),

    /// Another slot already tracks this process
    #[error("Process {pid} is already tracked by slot {slot}")]
    DuplicateProcess {
        /// The duplicated process
        pid: ProcessId,
        /// Slot that already holds it
        slot: usize,
    },
}

/// One tracked session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Worker process
    pub pid: ProcessId,
    /// Escalation state
    pub state: LifecycleState,
    /// Escalation starts at this instant; `None` means never
    pub deadline: Option<Instant>,
    /// When the worker was forked
    pub started_at: Instant,
    /// Client address, if known
    pub peer: Option<SocketAddr>,
}

impl Slot {
    /// A freshly started session
    pub fn running(
        pid: ProcessId,
        started_at: Instant,
        deadline: Option<Instant>,
        peer: Option<SocketAddr>,
    ) -> Self {
        Self {
            pid,
            state: LifecycleState::Running,
            deadline,
            started_at,
            peer,
        }
    }

    /// Whether the deadline has passed at `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    /// Move forward on the escalation ladder. Backward moves are ignored.
    pub fn advance(&mut self, next: LifecycleState) -> bool {
        if next.rank() > self.state.rank() {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// Fixed-capacity table of session slots
#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Option<Slot>>,
}

impl SlotTable {
    /// Create a table with every slot free
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether every slot is occupied
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Whether no slot is occupied
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Lowest free slot index
    pub fn find_free(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Store a session in a free slot
    pub fn occupy(&mut self, index: usize, slot: Slot) -> Result<(), SlotError> {
        if let Some(existing) = self.find_process(slot.pid) {
            return Err(SlotError::DuplicateProcess {
                pid: slot.pid,
                slot: existing,
            });
        }

        let entry = self
            .slots
            .get_mut(index)
            .ok_or(SlotError::OutOfRange(index))?;
        if entry.is_some() {
            return Err(SlotError::Occupied(index));
        }
        *entry = Some(slot);
        Ok(())
    }

    /// Free a slot, returning what it held
    pub fn release(&mut self, index: usize) -> Option<Slot> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Get a slot by index
    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Get a mutable slot by index
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Index of the slot tracking `pid`
    pub fn find_process(&self, pid: ProcessId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(slot) if slot.pid == pid))
    }

    /// Indices of occupied slots, lowest first
    pub fn occupied_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }

    /// Iterate over occupied slots
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|slot| (i, slot)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn slot(pid: i32) -> Slot {
        Slot::running(ProcessId(pid), Instant::now(), None, None)
    }

    #[test]
    fn test_new_table_is_empty() {
        let table = SlotTable::new(3);
        assert_eq!(table.capacity(), 3);
        assert_eq!(table.occupied(), 0);
        assert!(table.is_empty());
        assert_eq!(table.find_free(), Some(0));
    }

    #[test]
    fn test_lowest_index_preferred() {
        let mut table = SlotTable::new(3);
        table.occupy(0, slot(100)).unwrap();
        table.occupy(1, slot(101)).unwrap();
        table.occupy(2, slot(102)).unwrap();
        assert!(table.is_full());
        assert_eq!(table.find_free(), None);

        table.release(1);
        assert_eq!(table.find_free(), Some(1));
        table.release(0);
        assert_eq!(table.find_free(), Some(0));
    }

    #[test]
    fn test_occupied_never_exceeds_capacity() {
        let mut table = SlotTable::new(2);
        let mut pid = 1;
        while let Some(index) = table.find_free() {
            table.occupy(index, slot(pid)).unwrap();
            pid += 1;
        }
        assert_eq!(table.occupied(), 2);
        assert_eq!(table.occupy(5, slot(99)), Err(SlotError::OutOfRange(5)));
        assert_eq!(table.occupy(0, slot(99)), Err(SlotError::Occupied(0)));
        assert_eq!(table.occupied(), 2);
    }

    #[test]
    fn test_duplicate_process_rejected() {
        let mut table = SlotTable::new(2);
        table.occupy(0, slot(7)).unwrap();
        assert_eq!(
            table.occupy(1, slot(7)),
            Err(SlotError::DuplicateProcess {
                pid: ProcessId(7),
                slot: 0
            })
        );
    }

    #[test]
    fn test_release_returns_slot() {
        let mut table = SlotTable::new(1);
        table.occupy(0, slot(42)).unwrap();
        assert_eq!(table.find_process(ProcessId(42)), Some(0));

        let released = table.release(0).unwrap();
        assert_eq!(released.pid, ProcessId(42));
        assert!(table.release(0).is_none());
        assert!(table.find_process(ProcessId(42)).is_none());
    }

    #[test]
    fn test_iter_and_indices() {
        let mut table = SlotTable::new(4);
        table.occupy(1, slot(11)).unwrap();
        table.occupy(3, slot(13)).unwrap();
        assert_eq!(table.occupied_indices(), vec![1, 3]);
        let pids: Vec<_> = table.iter().map(|(_, s)| s.pid).collect();
        assert_eq!(pids, vec![ProcessId(11), ProcessId(13)]);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let now = Instant::now();
        let mut s = slot(1);
        assert!(s.advance(LifecycleState::GracePeriod { signalled_at: now }));
        assert!(s.advance(LifecycleState::ForceKilled));
        assert!(!s.advance(LifecycleState::Running));
        assert!(!s.advance(LifecycleState::GracePeriod { signalled_at: now }));
        assert_eq!(s.state, LifecycleState::ForceKilled);
    }

    #[test]
    fn test_is_expired() {
        let start = Instant::now();
        let s = Slot::running(
            ProcessId(1),
            start,
            Some(start + Duration::from_secs(2)),
            None,
        );
        assert!(!s.is_expired(start + Duration::from_secs(1)));
        assert!(s.is_expired(start + Duration::from_secs(2)));

        let forever = Slot::running(ProcessId(2), start, None, None);
        assert!(!forever.is_expired(start + Duration::from_secs(1_000_000)));
    }
}
