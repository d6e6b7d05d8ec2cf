//! Bounded-concurrency admission queue.
//!
//! Index paths return key columns only; the follow-up point reads for full
//! rows are fanned out through this queue so a large page cannot flood the
//! backend. Units wait in FIFO order (with priority-head insertion for work
//! that unblocks an in-flight operation) and run on their own coroutine once
//! a seat frees up.
//!
//! There is no timeout and no cancellation; the queue grows without bound.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{bounded, Receiver};
use may::go;

pub const DEFAULT_SEATS: usize = 24;

type Unit = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    waiting: VecDeque<Unit>,
    seats_limit: usize,
    seats_in_use: usize,
}

/// Handle for one submitted unit's result.
pub struct Ticket<T> {
    receiver: Receiver<T>,
}

impl<T> Ticket<T> {
    /// Blocks the calling coroutine until the unit finishes. `None` means the
    /// unit panicked before producing a result.
    pub fn wait(self) -> Option<T> {
        self.receiver.recv().ok()
    }
}

/// Seat-limited executor shared by all operations of one adapter.
#[derive(Clone)]
pub struct AdmissionQueue {
    state: Arc<Mutex<QueueState>>,
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new(DEFAULT_SEATS)
    }
}

impl AdmissionQueue {
    pub fn new(seats_limit: usize) -> Self {
        AdmissionQueue {
            state: Arc::new(Mutex::new(QueueState {
                waiting: VecDeque::new(),
                seats_limit,
                seats_in_use: 0,
            })),
        }
    }

    pub fn seats_limit(&self) -> usize {
        self.lock().seats_limit
    }

    /// Adjusts the seat count at runtime. Raising it admits queued units
    /// immediately; lowering it only throttles future admissions.
    pub fn set_seats_limit(&self, seats_limit: usize) {
        self.lock().seats_limit = seats_limit;
        self.pump();
    }

    /// Queues a unit at the tail and returns a ticket for its result.
    pub fn submit<T, F>(&self, work: F) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.enqueue(work, false)
    }

    /// Queues a unit at the head, ahead of everything already waiting.
    pub fn submit_front<T, F>(&self, work: F) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.enqueue(work, true)
    }

    fn enqueue<T, F>(&self, work: F, front: bool) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = bounded(1);
        let unit: Unit = Box::new(move || {
            if let Ok(value) = catch_unwind(AssertUnwindSafe(work)) {
                // The ticket may already be dropped; nothing to do then.
                let _ = sender.send(value);
            }
        });
        {
            let mut state = self.lock();
            if front {
                state.waiting.push_front(unit);
            } else {
                state.waiting.push_back(unit);
            }
        }
        self.pump();
        Ticket { receiver }
    }

    /// Starts waiting units while seats are free.
    fn pump(&self) {
        loop {
            let unit = {
                let mut state = self.lock();
                if state.seats_in_use >= state.seats_limit {
                    return;
                }
                match state.waiting.pop_front() {
                    Some(unit) => {
                        state.seats_in_use += 1;
                        unit
                    }
                    None => return,
                }
            };
            let queue = self.clone();
            go!(move || {
                unit();
                queue.lock().seats_in_use -= 1;
                queue.pump();
            });
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
