use crate::host::TimerId;

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

pub(crate) type TimerCallback = Rc<RefCell<Box<dyn FnMut(TimerId)>>>;

/// An entry in the host timer queue.
///
/// Entries are ordered by deadline, then by the sequence number they were
/// armed with, so timers sharing a deadline fire in the order they were
/// started.
struct TimerEntry {
    deadline: Instant,
    seq: u64,
    id: TimerId,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    /// Reversed so that a `BinaryHeap<TimerEntry>` pops the earliest
    /// deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Timer {
    interval: Duration,
    callback: TimerCallback,
}

/// Repeating timers keyed by id.
///
/// Killing a timer only forgets its id; its heap entry is discarded lazily
/// when it reaches the top.
pub(crate) struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    timers: HashMap<TimerId, Timer>,
    next_id: TimerId,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            timers: HashMap::new(),
            next_id: 1,
            next_seq: 0,
        }
    }

    fn arm(&mut self, id: TimerId, deadline: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry { deadline, seq, id });
    }

    pub(crate) fn start(&mut self, interval: Duration, callback: TimerCallback) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;

        self.timers.insert(id, Timer { interval, callback });
        self.arm(id, Instant::now() + interval);
        id
    }

    pub(crate) fn kill(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    pub(crate) fn is_live(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    /// Earliest deadline among live timers.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(entry) = self.heap.peek() {
            if self.timers.contains_key(&entry.id) {
                return Some(entry.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops every timer due at `now`, re-arms it for its next interval and
    /// returns the callbacks in firing order.
    ///
    /// Timers re-armed here are never returned by the same call, so a
    /// zero-interval timer fires once per host iteration.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<(TimerId, TimerCallback)> {
        let mut due = Vec::new();

        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Some(entry) = self.heap.pop() else { break };

            if let Some(timer) = self.timers.get(&entry.id) {
                due.push((entry.id, timer.callback.clone(), timer.interval));
            }
        }

        due.into_iter()
            .map(|(id, callback, interval)| {
                self.arm(id, now + interval);
                (id, callback)
            })
            .collect()
    }
}
