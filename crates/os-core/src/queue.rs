//! Per-priority FIFO rings of ready tasks.
//!
//! Each priority level owns a queue sized at configuration time. A level with
//! a single seat stores the task directly in a flat slot; larger levels use a
//! ring that keeps one entry free so that `head == next` always means empty.
//! The ring decides "full" by peeking the entry the next write would run
//! into, and every non-empty level has its bit set in the [`PriorityBitmap`].

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::bitmap::{PriorityBitmap, PrioritySet};
use crate::ids::{Priority, TaskId};

/// Returned when a task is queued at a level with no free seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOverflow {
    pub task: TaskId,
    pub prio: Priority,
}

impl fmt::Display for QueueOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no free seat for {} at {}", self.task, self.prio)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for QueueOverflow {}

/// Ring buffer with one wasted entry.
#[derive(Clone, PartialEq, Eq)]
pub struct TaskRing {
    entries: Box<[Option<TaskId>]>,
    head: usize,
    next: usize,
}

impl TaskRing {
    /// Creates a ring with room for `seats` tasks (`seats + 1` entries).
    pub fn with_seats(seats: usize) -> Self {
        assert!(seats >= 1, "a ring needs at least one seat");
        Self {
            entries: vec![None; seats + 1].into_boxed_slice(),
            head: 0,
            next: 0,
        }
    }

    /// Number of entries including the wasted one.
    pub fn n_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn next(&self) -> usize {
        self.next
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.next
    }

    /// Peeks the entry after `next`: it is only occupied once every seat is.
    pub fn is_full(&self) -> bool {
        self.entries[self.advance(self.next)].is_some()
    }

    pub fn len(&self) -> usize {
        (self.next + self.n_entries() - self.head) % self.n_entries()
    }

    pub fn peek(&self) -> Option<TaskId> {
        if self.is_empty() {
            None
        } else {
            self.entries[self.head]
        }
    }

    pub fn push_back(&mut self, task: TaskId) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries[self.next] = Some(task);
        self.next = self.advance(self.next);
        true
    }

    pub fn push_front(&mut self, task: TaskId) -> bool {
        if self.is_full() {
            return false;
        }
        self.head = self.retreat(self.head);
        debug_assert!(self.entries[self.head].is_none());
        self.entries[self.head] = Some(task);
        true
    }

    pub fn pop_front(&mut self) -> Option<TaskId> {
        if self.is_empty() {
            return None;
        }
        let task = self.entries[self.head].take();
        debug_assert!(task.is_some(), "occupied ring entry was empty");
        self.head = self.advance(self.head);
        task
    }

    /// Removes every entry of `task`, keeping the order of the others.
    pub fn purge(&mut self, task: TaskId) -> usize {
        let mut kept = Vec::with_capacity(self.len());
        let mut removed = 0;
        while let Some(entry) = self.pop_front() {
            if entry == task {
                removed += 1;
            } else {
                kept.push(entry);
            }
        }
        self.head = 0;
        self.next = 0;
        for entry in kept {
            self.push_back(entry);
        }
        removed
    }

    #[inline]
    fn advance(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.n_entries() {
            0
        } else {
            next
        }
    }

    #[inline]
    fn retreat(&self, index: usize) -> usize {
        if index == 0 {
            self.n_entries() - 1
        } else {
            index - 1
        }
    }
}

impl fmt::Debug for TaskRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRing")
            .field("head", &self.head)
            .field("next", &self.next)
            .field("entries", &self.entries)
            .finish()
    }
}

/// Queue of one priority level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskQueue {
    /// Level no task can occupy.
    Unused,
    /// Level with exactly one seat.
    Slot(Option<TaskId>),
    Ring(TaskRing),
}

impl TaskQueue {
    pub fn with_seats(seats: usize) -> Self {
        match seats {
            0 => Self::Unused,
            1 => Self::Slot(None),
            n => Self::Ring(TaskRing::with_seats(n)),
        }
    }

    pub fn seats(&self) -> usize {
        match self {
            Self::Unused => 0,
            Self::Slot(_) => 1,
            Self::Ring(ring) => ring.n_entries() - 1,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Unused => 0,
            Self::Slot(slot) => usize::from(slot.is_some()),
            Self::Ring(ring) => ring.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.peek().is_none()
    }

    pub fn peek(&self) -> Option<TaskId> {
        match self {
            Self::Unused => None,
            Self::Slot(slot) => *slot,
            Self::Ring(ring) => ring.peek(),
        }
    }

    fn push_back(&mut self, task: TaskId) -> bool {
        match self {
            Self::Unused => false,
            Self::Slot(slot @ None) => {
                *slot = Some(task);
                true
            }
            Self::Slot(Some(_)) => false,
            Self::Ring(ring) => ring.push_back(task),
        }
    }

    fn push_front(&mut self, task: TaskId) -> bool {
        match self {
            Self::Ring(ring) => ring.push_front(task),
            other => other.push_back(task),
        }
    }

    fn pop_front(&mut self) -> Option<TaskId> {
        match self {
            Self::Unused => None,
            Self::Slot(slot) => slot.take(),
            Self::Ring(ring) => ring.pop_front(),
        }
    }

    fn purge(&mut self, task: TaskId) -> usize {
        match self {
            Self::Unused => 0,
            Self::Slot(slot) if *slot == Some(task) => {
                *slot = None;
                1
            }
            Self::Slot(_) => 0,
            Self::Ring(ring) => ring.purge(task),
        }
    }
}

/// Head of the highest non-empty queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEntry {
    pub task: TaskId,
    pub prio: Priority,
}

/// One queue per task priority plus the bitmap summarising them.
#[derive(Debug, Clone)]
pub struct ReadyQueues {
    queues: Vec<TaskQueue>,
    bitmap: PriorityBitmap,
}

impl ReadyQueues {
    /// Builds the queue array from the number of seats of every level.
    pub fn new(seats: &[usize]) -> Self {
        Self::with_bitmap(seats, PriorityBitmap::for_levels(seats.len()))
    }

    pub fn with_bitmap(seats: &[usize], bitmap: PriorityBitmap) -> Self {
        assert_eq!(
            bitmap.levels(),
            seats.len(),
            "bitmap levels must match the queue array"
        );
        Self {
            queues: seats.iter().map(|&n| TaskQueue::with_seats(n)).collect(),
            bitmap,
        }
    }

    pub fn levels(&self) -> usize {
        self.queues.len()
    }

    pub fn queue(&self, prio: Priority) -> &TaskQueue {
        &self.queues[prio.index()]
    }

    pub fn bitmap(&self) -> &PriorityBitmap {
        &self.bitmap
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn len(&self, prio: Priority) -> usize {
        self.queue(prio).len()
    }

    /// Total number of queued entries.
    pub fn total(&self) -> usize {
        self.queues.iter().map(TaskQueue::len).sum()
    }

    /// Appends `task` at `prio`.
    pub fn enqueue(&mut self, task: TaskId, prio: Priority) -> Result<(), QueueOverflow> {
        let queue = self.level_mut(prio, task)?;
        if !queue.push_back(task) {
            return Err(QueueOverflow { task, prio });
        }
        self.bitmap.insert(prio.index());
        Ok(())
    }

    /// Prepends `task` at `prio` so it runs before the tasks already waiting
    /// there.
    pub fn insert(&mut self, task: TaskId, prio: Priority) -> Result<(), QueueOverflow> {
        let queue = self.level_mut(prio, task)?;
        if !queue.push_front(task) {
            return Err(QueueOverflow { task, prio });
        }
        self.bitmap.insert(prio.index());
        Ok(())
    }

    /// Removes `task` from the head of `prio`. Returns false if it was not
    /// the head.
    pub fn dequeue_task(&mut self, task: TaskId, prio: Priority) -> bool {
        if self.queue(prio).peek() != Some(task) {
            return false;
        }
        self.dequeue(prio).is_some()
    }

    /// Removes the head of `prio`.
    pub fn dequeue(&mut self, prio: Priority) -> Option<TaskId> {
        let queue = self.queues.get_mut(prio.index())?;
        let task = queue.pop_front()?;
        if queue.is_empty() {
            self.bitmap.remove(prio.index());
        }
        Some(task)
    }

    /// Head of the highest non-empty queue, or `None` when nothing is ready.
    #[inline]
    pub fn find_highest(&self) -> Option<ReadyEntry> {
        let prio = self.bitmap.highest()?;
        let task = self.queues[prio].peek();
        debug_assert!(task.is_some(), "bitmap bit {prio} set over an empty queue");
        task.map(|task| ReadyEntry {
            task,
            prio: Priority::new_unchecked(prio as u16),
        })
    }

    /// Removes and returns the head of the highest non-empty queue.
    pub fn pop_highest(&mut self) -> Option<ReadyEntry> {
        let entry = self.find_highest()?;
        self.dequeue(entry.prio);
        Some(entry)
    }

    /// Highest priority with a ready task.
    pub fn highest_priority(&self) -> Option<Priority> {
        self.bitmap
            .highest()
            .map(|prio| Priority::new_unchecked(prio as u16))
    }

    /// Drops every queued entry of `task` at all levels.
    pub fn purge(&mut self, task: TaskId) -> usize {
        let mut removed = 0;
        for (prio, queue) in self.queues.iter_mut().enumerate() {
            let n = queue.purge(task);
            if n > 0 && queue.is_empty() {
                self.bitmap.remove(prio);
            }
            removed += n;
        }
        removed
    }

    pub fn clear(&mut self) {
        for queue in &mut self.queues {
            while queue.pop_front().is_some() {}
        }
        self.bitmap.clear_all();
    }

    fn level_mut(&mut self, prio: Priority, task: TaskId) -> Result<&mut TaskQueue, QueueOverflow> {
        self.queues
            .get_mut(prio.index())
            .ok_or(QueueOverflow { task, prio })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::collections::VecDeque;

    fn prio(level: u16) -> Priority {
        Priority::new_unchecked(level)
    }

    #[test]
    fn single_seat_level_uses_flat_slot() {
        let mut queues = ReadyQueues::new(&[0, 1, 3]);
        assert!(matches!(queues.queue(prio(1)), TaskQueue::Slot(None)));
        assert!(matches!(queues.queue(prio(2)), TaskQueue::Ring(_)));

        queues.enqueue(TaskId(7), prio(1)).unwrap();
        assert_eq!(
            queues.enqueue(TaskId(8), prio(1)),
            Err(QueueOverflow {
                task: TaskId(8),
                prio: prio(1)
            })
        );
        assert_eq!(queues.dequeue(prio(1)), Some(TaskId(7)));
        assert!(queues.is_empty());
    }

    #[test]
    fn unused_level_rejects_tasks() {
        let mut queues = ReadyQueues::new(&[0, 1]);
        assert!(queues.enqueue(TaskId(1), prio(0)).is_err());
        assert!(queues.enqueue(TaskId(1), prio(5)).is_err());
    }

    #[test]
    fn ring_reports_full_after_all_seats() {
        let mut ring = TaskRing::with_seats(3);
        assert_eq!(ring.n_entries(), 4);
        for id in 0..3 {
            assert!(!ring.is_full());
            assert!(ring.push_back(TaskId(id)));
        }
        assert!(ring.is_full());
        assert!(!ring.push_back(TaskId(9)));
        assert!(!ring.push_front(TaskId(9)));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn insert_goes_ahead_of_waiting_tasks() {
        let mut queues = ReadyQueues::new(&[0, 3]);
        queues.enqueue(TaskId(1), prio(1)).unwrap();
        queues.enqueue(TaskId(2), prio(1)).unwrap();
        queues.insert(TaskId(3), prio(1)).unwrap();
        assert_eq!(queues.pop_highest().map(|e| e.task), Some(TaskId(3)));
        assert_eq!(queues.pop_highest().map(|e| e.task), Some(TaskId(1)));
        assert_eq!(queues.pop_highest().map(|e| e.task), Some(TaskId(2)));
        assert_eq!(queues.pop_highest(), None);
    }

    #[test]
    fn dequeue_task_only_removes_head() {
        let mut queues = ReadyQueues::new(&[0, 2]);
        queues.enqueue(TaskId(1), prio(1)).unwrap();
        queues.enqueue(TaskId(2), prio(1)).unwrap();
        assert!(!queues.dequeue_task(TaskId(2), prio(1)));
        assert!(queues.dequeue_task(TaskId(1), prio(1)));
        assert_eq!(queues.len(prio(1)), 1);
    }

    #[test]
    fn purge_keeps_order_and_clears_bits() {
        let mut queues = ReadyQueues::new(&[0, 4, 1]);
        queues.enqueue(TaskId(1), prio(1)).unwrap();
        queues.enqueue(TaskId(2), prio(1)).unwrap();
        queues.enqueue(TaskId(1), prio(1)).unwrap();
        queues.enqueue(TaskId(1), prio(2)).unwrap();

        assert_eq!(queues.purge(TaskId(1)), 3);
        assert!(!queues.bitmap().contains(2));
        assert_eq!(queues.find_highest().map(|e| e.task), Some(TaskId(2)));
        assert_eq!(queues.total(), 1);
    }

    /// Random enqueue/dequeue traffic checked against one `VecDeque` per
    /// level: the highest non-empty level is always served first and each
    /// level is FIFO.
    #[quickcheck]
    fn highest_priority_and_fifo_order(bytecode: Vec<u8>) {
        const LEVELS: usize = 40;
        let seats: Vec<usize> = (0..LEVELS).map(|p| p % 4).collect();
        let mut subject = ReadyQueues::new(&seats);
        let mut reference: Vec<VecDeque<TaskId>> = vec![VecDeque::new(); LEVELS];
        let mut next_id = 0u16;

        for instr in bytecode.chunks_exact(2) {
            let level = instr[1] as usize % LEVELS;
            if instr[0] % 3 != 0 {
                let task = TaskId(next_id);
                next_id = next_id.wrapping_add(1);
                let accepted = subject.enqueue(task, prio(level as u16)).is_ok();
                assert_eq!(accepted, reference[level].len() < seats[level]);
                if accepted {
                    reference[level].push_back(task);
                }
            } else {
                let expected = reference
                    .iter_mut()
                    .enumerate()
                    .rev()
                    .find(|(_, q)| !q.is_empty())
                    .map(|(p, q)| (p, q.pop_front()));
                let got = subject.pop_highest();
                assert_eq!(
                    got.map(|e| (e.prio.index(), Some(e.task))),
                    expected
                );
            }
            let expected_head = reference
                .iter()
                .enumerate()
                .rev()
                .find_map(|(p, q)| q.front().map(|t| (p, *t)));
            assert_eq!(
                subject.find_highest().map(|e| (e.prio.index(), e.task)),
                expected_head
            );
        }
    }

    /// Alternating traffic wraps the ring many times without false "full"
    /// reports.
    #[quickcheck]
    fn ring_wraparound(seats: u8, fill: u8) -> bool {
        let seats = usize::from(seats % 15) + 1;
        let fill = usize::from(fill) % seats;
        let mut ring = TaskRing::with_seats(seats);
        for i in 0..fill {
            assert!(ring.push_back(TaskId(i as u16)));
        }
        let n = ring.n_entries();
        for round in 0..2 * n {
            if ring.is_full() {
                return false;
            }
            assert!(ring.push_back(TaskId(1000 + round as u16)));
            assert!(ring.pop_front().is_some());
            assert_eq!(ring.len(), fill);
            assert!(ring.head() < n && ring.next() < n);
            assert_eq!((ring.next() + n - ring.head()) % n, fill);
        }
        true
    }

    #[quickcheck]
    fn peek_full_agrees_with_index_test(seats: u8, ops: Vec<bool>) {
        let seats = usize::from(seats % 10) + 1;
        let mut ring = TaskRing::with_seats(seats);
        for (i, push) in ops.into_iter().enumerate() {
            if push {
                ring.push_back(TaskId(i as u16));
            } else {
                ring.pop_front();
            }
            let index_full = (ring.next() + 1) % ring.n_entries() == ring.head();
            assert_eq!(ring.is_full(), index_full);
        }
    }
}
