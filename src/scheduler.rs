//! Single-threaded discrete-event scheduler over virtual time.
//!
//! Event handles map to a generation-indexed slot in an arena-backed
//! priority queue (design note), so cancellation is a cheap
//! generation bump rather than a heap search. Ties at equal virtual time
//! resolve FIFO by insertion order (stable).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use crate::time::VirtualTime;

/// Opaque reference to a scheduled event. `cancel` on an unknown or
/// already-fired handle is defined to be a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandle {
    index: usize,
    generation: u64,
}

struct Slot<Ctx> {
    generation: u64,
    callback: Option<Box<dyn FnOnce(&mut Ctx, &mut Scheduler<Ctx>)>>,
}

struct QueueEntry {
    time: VirtualTime,
    seq: u64,
    index: usize,
    generation: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    /// Reversed so [`BinaryHeap`] (a max-heap) pops the *smallest* time
    /// first, with ties broken by insertion order (smallest `seq` first).
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct Scheduler<Ctx> {
    heap: BinaryHeap<QueueEntry>,
    slots: Vec<Slot<Ctx>>,
    free: Vec<usize>,
    next_seq: u64,
    now: VirtualTime,
    stopped: bool,
}

impl<Ctx> Default for Scheduler<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx> Scheduler<Ctx> {
    pub fn new() -> Self {
        Scheduler {
            heap: BinaryHeap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            next_seq: 0,
            now: VirtualTime::ZERO,
            stopped: false,
        }
    }

    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Signal that the run loop should stop before examining further
    /// events, even if the queue is non-empty and the deadline hasn't
    /// passed).
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn schedule(
        &mut self,
        delay: Duration,
        callback: impl FnOnce(&mut Ctx, &mut Scheduler<Ctx>) + 'static,
    ) -> EventHandle {
        self.schedule_at(self.now + delay, callback)
    }

    pub fn schedule_at(
        &mut self,
        time: VirtualTime,
        callback: impl FnOnce(&mut Ctx, &mut Scheduler<Ctx>) + 'static,
    ) -> EventHandle {
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    callback: None,
                });
                self.slots.len() - 1
            }
        };
        self.slots[index].generation = self.slots[index].generation.wrapping_add(1);
        let generation = self.slots[index].generation;
        self.slots[index].callback = Some(Box::new(callback));

        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry {
            time,
            seq,
            index,
            generation,
        });

        EventHandle { index, generation }
    }

    /// No-op if `handle` refers to a slot that has already fired, already
    /// been cancelled, or was never valid for this scheduler instance.
    pub fn cancel(&mut self, handle: EventHandle) {
        if let Some(slot) = self.slots.get_mut(handle.index) {
            if slot.generation == handle.generation && slot.callback.is_some() {
                slot.callback = None;
                self.free.push(handle.index);
            }
        }
    }

    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.slots
            .get(handle.index)
            .map(|slot| slot.generation == handle.generation && slot.callback.is_some())
            .unwrap_or(false)
    }

    /// Pop and return the next due callback whose scheduled time does not
    /// exceed `deadline`, advancing virtual time to that event's timestamp.
    /// Skips over tombstoned (cancelled) slots without consuming a virtual
    /// time step for them.
    fn pop_next(
        &mut self,
        deadline: VirtualTime,
    ) -> Option<Box<dyn FnOnce(&mut Ctx, &mut Scheduler<Ctx>)>> {
        while let Some(entry) = self.heap.peek() {
            if entry.time > deadline {
                return None;
            }
            let entry = self.heap.pop().unwrap();
            let slot = &mut self.slots[entry.index];
            if slot.generation != entry.generation {
                continue; // stale: slot was reused after cancellation
            }
            let callback = slot.callback.take();
            self.free.push(entry.index);
            self.now = entry.time;
            if let Some(cb) = callback {
                return Some(cb);
            }
        }
        None
    }

    /// Run until the queue is empty, `deadline` is reached, or `stop()` was
    /// called from within a callback.
    pub fn run_until(&mut self, ctx: &mut Ctx, deadline: VirtualTime) {
        loop {
            if self.stopped {
                break;
            }
            match self.pop_next(deadline) {
                Some(callback) => callback(ctx, self),
                None => break,
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_time_order_with_fifo_ties() {
        let mut sched: Scheduler<Vec<u32>> = Scheduler::new();
        let mut log = Vec::new();
        sched.schedule(Duration::from_micros(10), |ctx, _| ctx.push(2));
        sched.schedule(Duration::from_micros(5), |ctx, _| ctx.push(1));
        sched.schedule(Duration::from_micros(10), |ctx, _| ctx.push(3));
        sched.run_until(&mut log, VirtualTime::from_micros(u64::MAX));
        assert_eq!(log, vec![1, 2, 3]);
    }

    #[test]
    fn cancel_prevents_execution() {
        let mut sched: Scheduler<Vec<u32>> = Scheduler::new();
        let mut log = Vec::new();
        let h = sched.schedule(Duration::from_micros(5), |ctx, _| ctx.push(99));
        sched.cancel(h);
        sched.run_until(&mut log, VirtualTime::from_micros(u64::MAX));
        assert!(log.is_empty());
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        let mut sched: Scheduler<Vec<u32>> = Scheduler::new();
        let mut log = Vec::new();
        let h = sched.schedule(Duration::from_micros(1), |ctx, _| ctx.push(1));
        sched.run_until(&mut log, VirtualTime::from_micros(u64::MAX));
        sched.cancel(h); // should not panic or affect anything
        assert_eq!(log, vec![1]);
    }

    #[test]
    fn deadline_stops_before_later_events() {
        let mut sched: Scheduler<Vec<u32>> = Scheduler::new();
        let mut log = Vec::new();
        sched.schedule(Duration::from_micros(5), |ctx, _| ctx.push(1));
        sched.schedule(Duration::from_micros(50), |ctx, _| ctx.push(2));
        sched.run_until(&mut log, VirtualTime::from_micros(10));
        assert_eq!(log, vec![1]);
        assert_eq!(sched.pending_count(), 1);
    }

    #[test]
    fn callback_can_schedule_further_events() {
        let mut sched: Scheduler<Vec<u32>> = Scheduler::new();
        let mut log = Vec::new();
        sched.schedule(Duration::from_micros(1), |ctx, sched| {
            ctx.push(1);
            sched.schedule(Duration::from_micros(1), |ctx, _| ctx.push(2));
        });
        sched.run_until(&mut log, VirtualTime::from_micros(u64::MAX));
        assert_eq!(log, vec![1, 2]);
    }

    #[test]
    fn explicit_stop_halts_before_queue_drains() {
        let mut sched: Scheduler<Vec<u32>> = Scheduler::new();
        let mut log = Vec::new();
        sched.schedule(Duration::from_micros(1), |ctx, sched| {
            ctx.push(1);
            sched.stop();
        });
        sched.schedule(Duration::from_micros(2), |ctx, _| ctx.push(2));
        sched.run_until(&mut log, VirtualTime::from_micros(u64::MAX));
        assert_eq!(log, vec![1]);
    }
}
