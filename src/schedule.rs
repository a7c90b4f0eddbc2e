//! Deferred cooperative work: a min-heap of (fire time, action) pairs
//! drained at the top of each frame. There are no threads and no blocking
//! sleeps; liveness (disposal, nuked actors) is re-checked when an action
//! actually runs, not when it is scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::NodeId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeferredAction {
    /// Remove an actor from simulation after its post-death delay.
    NukeActor { node: NodeId, destroy: bool },
    /// Death jingle, shortly after the death is detected.
    LaughSound { node: NodeId },
}

struct Entry {
    due_ms: u64,
    seq: u64,
    action: DeferredAction,
}

// BinaryHeap is a max-heap; order entries reversed so the earliest fire
// time (ties broken by schedule order) pops first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due_ms
            .cmp(&self.due_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due_ms == other.due_ms && self.seq == other.seq
    }
}

impl Eq for Entry {}

#[derive(Default)]
pub struct DeferredQueue {
    heap: BinaryHeap<Entry>,
    seq: u64,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_in(&mut self, now_ms: f64, delay_ms: f64, action: DeferredAction) {
        let due_ms = (now_ms + delay_ms.max(0.0)).max(0.0) as u64;
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        self.heap.push(Entry {
            due_ms,
            seq,
            action,
        });
    }

    /// Pop the next action whose fire time has passed, if any.
    pub fn pop_due(&mut self, now_ms: f64) -> Option<DeferredAction> {
        let due = self.heap.peek()?.due_ms;
        if (due as f64) <= now_ms {
            self.heap.pop().map(|e| e.action)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_time_order() {
        let mut q = DeferredQueue::new();
        q.schedule_in(0.0, 300.0, DeferredAction::LaughSound { node: 2 });
        q.schedule_in(0.0, 100.0, DeferredAction::NukeActor {
            node: 1,
            destroy: true,
        });
        assert_eq!(q.pop_due(50.0), None);
        assert_eq!(
            q.pop_due(150.0),
            Some(DeferredAction::NukeActor {
                node: 1,
                destroy: true
            })
        );
        assert_eq!(q.pop_due(150.0), None);
        assert_eq!(q.pop_due(400.0), Some(DeferredAction::LaughSound { node: 2 }));
        assert!(q.is_empty());
    }

    #[test]
    fn ties_fire_in_schedule_order() {
        let mut q = DeferredQueue::new();
        q.schedule_in(0.0, 10.0, DeferredAction::LaughSound { node: 1 });
        q.schedule_in(0.0, 10.0, DeferredAction::LaughSound { node: 2 });
        assert_eq!(q.pop_due(10.0), Some(DeferredAction::LaughSound { node: 1 }));
        assert_eq!(q.pop_due(10.0), Some(DeferredAction::LaughSound { node: 2 }));
    }
}
