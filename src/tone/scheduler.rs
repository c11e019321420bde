use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug)]
struct Deadline<T> {
    at: f64,
    seq: u64,
    event: T,
}

impl<T> PartialEq for Deadline<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Deadline<T> {}

impl<T> PartialOrd for Deadline<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Deadline<T> {
    // Reversed: the heap pops the earliest deadline, then the oldest entry.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Deferred events keyed by session time, drained at the top of each tick.
#[derive(Debug)]
pub struct DeadlineQueue<T> {
    heap: BinaryHeap<Deadline<T>>,
    seq: u64,
}

impl<T> Default for DeadlineQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }
}

impl<T> DeadlineQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: f64, event: T) {
        self.heap.push(Deadline {
            at,
            seq: self.seq,
            event,
        });
        self.seq += 1;
    }

    /// Remove and return every event due at or before `now`, in deadline order.
    pub fn drain_due(&mut self, now: f64) -> Vec<T> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|d| d.at <= now) {
            if let Some(deadline) = self.heap.pop() {
                due.push(deadline.event);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every pending event without running it.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
