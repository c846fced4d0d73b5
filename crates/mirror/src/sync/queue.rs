//! Blocking FIFO work queue with in-flight accounting

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use super::ShutdownFlag;

struct QueueState<T> {
    items: VecDeque<T>,
    in_flight: usize,
}

/// A FIFO shared between producer and consumer threads.
///
/// Popped items stay "in flight" until their [`Claim`] is dropped, so
/// [`is_idle`](Self::is_idle) only reports true once every consumer has
/// finished (and has had the chance to enqueue follow-up work).
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
}

/// An item being processed; finishing is signalled on drop
pub struct Claim<'a, T> {
    queue: &'a WorkQueue<T>,
    item: T,
}

impl<T> Deref for Claim<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T> Drop for Claim<'_, T> {
    fn drop(&mut self) {
        let mut state = self.queue.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

impl<T> WorkQueue<T> {
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                in_flight: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue, waiting while the queue is full.
    ///
    /// Returns false (dropping the item) if shutdown is requested while waiting.
    pub fn push(&self, item: T, shutdown: &ShutdownFlag, poll: Duration) -> bool {
        let mut state = self.lock();
        loop {
            match self.capacity {
                Some(capacity) if state.items.len() >= capacity => {
                    if shutdown.is_set() {
                        return false;
                    }
                    state = self
                        .not_full
                        .wait_timeout(state, poll)
                        .unwrap_or_else(|e| e.into_inner())
                        .0;
                }
                _ => break,
            }
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        true
    }

    /// Take the next item, waiting up to `timeout` for one to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Claim<'_, T>> {
        let mut state = self.lock();
        if state.items.is_empty() {
            state = self
                .not_empty
                .wait_timeout_while(state, timeout, |s| s.items.is_empty())
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        let item = state.items.pop_front()?;
        state.in_flight += 1;
        drop(state);
        self.not_full.notify_one();
        Some(Claim { queue: self, item })
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Nothing queued and nothing being processed
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.items.is_empty() && state.in_flight == 0
    }
}

/// Wait until `is_idle` holds for `checks` consecutive observations taken
/// `poll` apart.
///
/// A single idle observation is not enough: a worker may be about to
/// enqueue more work. Returns false if shutdown was requested first.
pub fn wait_for_quiescence(
    checks: usize,
    poll: Duration,
    shutdown: &ShutdownFlag,
    mut on_tick: impl FnMut(),
    is_idle: impl Fn() -> bool,
) -> bool {
    let mut consecutive = 0;
    loop {
        if shutdown.is_set() {
            return false;
        }
        if is_idle() {
            consecutive += 1;
            if consecutive >= checks.max(1) {
                return true;
            }
        } else {
            consecutive = 0;
        }
        on_tick();
        std::thread::sleep(poll);
    }
}
