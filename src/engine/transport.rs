use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic time source in seconds.
pub trait Clock {
    fn now(&self) -> f64;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, secs: f64) {
        self.now.set(self.now.get() + secs);
    }

    pub fn set(&self, secs: f64) {
        self.now.set(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Started,
    Paused,
}

/// Handle to one registered trigger, scoped to the registration generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerId {
    generation: u64,
    seq: u64,
}

struct Scheduled<T> {
    time: f64,
    id: TriggerId,
    payload: T,
}

impl<T> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Scheduled<T> {}

impl<T> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap pops the earliest time, then the earliest registration.
impl<T> Ord for Scheduled<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.id.seq.cmp(&self.id.seq))
    }
}

/// A pausable clock position plus a queue of one-shot triggers at absolute positions.
pub struct Transport<T> {
    clock: Box<dyn Clock>,
    state: TransportState,
    anchor: f64,
    offset: f64,
    bpm: f64,
    queue: BinaryHeap<Scheduled<T>>,
    generation: u64,
    next_seq: u64,
}

impl<T> Transport<T> {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self {
            clock,
            state: TransportState::Stopped,
            anchor: 0.0,
            offset: 0.0,
            bpm: crate::model::score::DEFAULT_BPM,
            queue: BinaryHeap::new(),
            generation: 0,
            next_seq: 0,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm;
    }

    /// Seconds since the transport was started, not counting time spent paused.
    pub fn position(&self) -> f64 {
        match self.state {
            TransportState::Started => self.offset + (self.clock.now() - self.anchor),
            TransportState::Paused => self.offset,
            TransportState::Stopped => 0.0,
        }
    }

    pub fn start(&mut self) {
        if self.state == TransportState::Started {
            return;
        }
        self.anchor = self.clock.now();
        self.state = TransportState::Started;
    }

    pub fn pause(&mut self) {
        if self.state == TransportState::Started {
            self.offset = self.position();
            self.state = TransportState::Paused;
        }
    }

    /// Stops and rewinds to 0. Pending triggers stay registered.
    pub fn stop(&mut self) {
        self.state = TransportState::Stopped;
        self.offset = 0.0;
    }

    pub fn schedule_once(&mut self, time: f64, payload: T) -> TriggerId {
        let id = TriggerId {
            generation: self.generation,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.queue.push(Scheduled { time, id, payload });

        id
    }

    /// Invalidates every handle issued so far and drops their triggers.
    pub fn cancel_all(&mut self) -> usize {
        self.generation += 1;
        let cancelled = std::mem::take(&mut self.queue);

        cancelled.len()
    }

    pub fn is_current(&self, id: TriggerId) -> bool {
        id.generation == self.generation
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Seconds until the next trigger is due, while started.
    pub fn next_due_in(&self) -> Option<f64> {
        if self.state != TransportState::Started {
            return None;
        }
        self.queue
            .peek()
            .map(|next| (next.time - self.position()).max(0.0))
    }

    /// Removes and returns the earliest trigger at or before the current position.
    pub fn pop_due(&mut self) -> Option<(f64, T)> {
        if self.state != TransportState::Started {
            return None;
        }

        let position = self.position();
        if self.queue.peek()?.time > position {
            return None;
        }

        self.queue.pop().map(|s| (s.time, s.payload))
    }
}
