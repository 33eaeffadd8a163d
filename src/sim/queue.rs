//! Deterministic discrete-event queue.
//!
//! Events are delivered in timestamp order; events carrying the same
//! timestamp are delivered in the order they were scheduled. Because ties
//! break on the insertion sequence number, two runs that schedule the same
//! events in the same order replay identically.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// Simulated time in microseconds since the start of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub fn from_us(us: u64) -> Self {
        SimTime(us)
    }

    pub fn as_us(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 * 1e-6
    }

    /// Time advanced by `us` microseconds.
    pub fn offset(self, us: u64) -> Self {
        SimTime(self.0 + us)
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Handle to a scheduled event, usable to cancel it before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u64);

struct Scheduled<E> {
    time: SimTime,
    seq: u64,
    event: E,
}

// Ordering ignores the payload: (time, seq) alone decides delivery, and
// BinaryHeap is a max-heap, so reverse to pop the earliest first.
impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        Reverse((self.time, self.seq)).cmp(&Reverse((other.time, other.seq)))
    }
}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.seq) == (other.time, other.seq)
    }
}

impl<E> Eq for Scheduled<E> {}

/// Priority queue of pending events with O(1) cancellation.
///
/// Cancelled events stay in the heap as tombstones and are skipped when they
/// surface; this keeps cancellation cheap without disturbing the ordering of
/// the survivors.
pub struct EventQueue<E> {
    heap: BinaryHeap<Scheduled<E>>,
    cancelled: HashSet<u64>,
    next_seq: u64,
    now: SimTime,
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_seq: 0,
            now: SimTime::ZERO,
        }
    }

    /// Current simulated time: the timestamp of the last delivered event.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `event` at absolute time `at`.
    ///
    /// Scheduling in the past is a logic error in the caller; the event is
    /// clamped to the current time so it still fires (after everything
    /// already queued for `now`), and the slip is logged.
    pub fn schedule(&mut self, at: SimTime, event: E) -> EventId {
        let at = if at < self.now {
            log::warn!("event scheduled {} behind current time {}", at, self.now);
            self.now
        } else {
            at
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled { time: at, seq, event });
        EventId(seq)
    }

    /// Cancel a pending event. Cancelling an already-delivered or
    /// already-cancelled event has no effect.
    pub fn cancel(&mut self, id: EventId) {
        self.cancelled.insert(id.0);
    }

    /// Pop the next live event, advancing the clock to its timestamp.
    pub fn pop(&mut self) -> Option<(SimTime, E)> {
        while let Some(entry) = self.heap.pop() {
            if self.cancelled.remove(&entry.seq) {
                continue;
            }
            self.now = entry.time;
            return Some((entry.time, entry.event));
        }
        None
    }

    /// True when no live events remain.
    pub fn is_empty(&self) -> bool {
        self.heap
            .iter()
            .all(|entry| self.cancelled.contains(&entry.seq))
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_pop_in_time_order() {
        let mut q = EventQueue::new();
        q.schedule(SimTime::from_us(30), "c");
        q.schedule(SimTime::from_us(10), "a");
        q.schedule(SimTime::from_us(20), "b");
        assert_eq!(q.pop(), Some((SimTime::from_us(10), "a")));
        assert_eq!(q.pop(), Some((SimTime::from_us(20), "b")));
        assert_eq!(q.pop(), Some((SimTime::from_us(30), "c")));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn same_timestamp_preserves_insertion_order() {
        let mut q = EventQueue::new();
        for label in ["first", "second", "third"] {
            q.schedule(SimTime::from_us(5), label);
        }
        assert_eq!(q.pop().unwrap().1, "first");
        assert_eq!(q.pop().unwrap().1, "second");
        assert_eq!(q.pop().unwrap().1, "third");
    }

    #[test]
    fn cancelled_events_are_skipped() {
        let mut q = EventQueue::new();
        q.schedule(SimTime::from_us(1), "keep-early");
        let id = q.schedule(SimTime::from_us(2), "drop");
        q.schedule(SimTime::from_us(3), "keep-late");
        q.cancel(id);
        assert_eq!(q.pop().unwrap().1, "keep-early");
        assert_eq!(q.pop().unwrap().1, "keep-late");
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn clock_tracks_delivered_events() {
        let mut q = EventQueue::new();
        q.schedule(SimTime::from_us(42), ());
        assert_eq!(q.now(), SimTime::ZERO);
        q.pop();
        assert_eq!(q.now(), SimTime::from_us(42));
    }

    #[test]
    fn past_schedule_is_clamped_to_now() {
        let mut q = EventQueue::new();
        q.schedule(SimTime::from_us(10), "now");
        q.pop();
        q.schedule(SimTime::from_us(3), "late");
        assert_eq!(q.pop(), Some((SimTime::from_us(10), "late")));
    }
}
