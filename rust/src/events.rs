//! Timestamped simulation events and the queue that dispatches them.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::models::{JobId, Time};

/// What happened to a job. Declaration order is the tie-break order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Submission,
    Start,
    Termination,
}

/// Ordered by timestamp, then job id, then kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Event {
    pub timestamp: Time,
    pub job_id: JobId,
    pub kind: EventKind,
}

impl Event {
    pub fn submission(timestamp: Time, job_id: JobId) -> Self {
        Self {
            timestamp,
            job_id,
            kind: EventKind::Submission,
        }
    }

    pub fn start(timestamp: Time, job_id: JobId) -> Self {
        Self {
            timestamp,
            job_id,
            kind: EventKind::Start,
        }
    }

    pub fn termination(timestamp: Time, job_id: JobId) -> Self {
        Self {
            timestamp,
            job_id,
            kind: EventKind::Termination,
        }
    }
}

/// Min-heap of pending events.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.heap.push(Reverse(event));
    }

    pub fn add_events(&mut self, events: impl IntoIterator<Item = Event>) {
        self.heap.extend(events.into_iter().map(Reverse));
    }

    /// Remove and return the earliest event.
    pub fn pop_min_event(&mut self) -> Option<Event> {
        self.heap.pop().map(|Reverse(event)| event)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
