//! Single-fire completion signals.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
enum SignalState<T> {
    Pending,
    Done(T),
    Taken,
    Abandoned,
}

/// A value delivered at most once, awaited with a bound.
#[derive(Debug)]
pub struct Completion<T> {
    state: Mutex<SignalState<T>>,
    fired: Condvar,
}

impl<T> Completion<T> {
    /// Creates a pending signal.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SignalState::Pending),
            fired: Condvar::new(),
        }
    }

    /// Delivers the value. Returns false if the signal already fired.
    pub fn complete(&self, value: T) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, SignalState::Pending) {
            return false;
        }
        *state = SignalState::Done(value);
        self.fired.notify_all();
        true
    }

    /// Wakes waiters without a value.
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        if matches!(*state, SignalState::Pending) {
            *state = SignalState::Abandoned;
            self.fired.notify_all();
        }
    }

    /// Returns true once the signal was abandoned.
    pub fn is_abandoned(&self) -> bool {
        matches!(*self.state.lock(), SignalState::Abandoned)
    }

    /// Returns true once a value was delivered.
    pub fn is_complete(&self) -> bool {
        matches!(*self.state.lock(), SignalState::Done(_) | SignalState::Taken)
    }

    /// Waits for the value. Returns `None` on timeout or abandonment, or if
    /// another waiter already took the value.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while matches!(*state, SignalState::Pending) {
            if self.fired.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        match std::mem::replace(&mut *state, SignalState::Taken) {
            SignalState::Done(value) => Some(value),
            other => {
                *state = other;
                None
            }
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fires a fresh [`Completion`] when the last of `n` tasks arrives.
#[derive(Debug)]
pub struct Countdown {
    remaining: AtomicUsize,
    done: Arc<Completion<()>>,
}

impl Countdown {
    /// Creates a countdown for `tasks` arrivals. Zero tasks fire at once.
    pub fn new(tasks: usize) -> Arc<Self> {
        let countdown = Arc::new(Self {
            remaining: AtomicUsize::new(tasks),
            done: Arc::new(Completion::new()),
        });
        if tasks == 0 {
            countdown.done.complete(());
        }
        countdown
    }

    /// Records one finished task.
    pub fn arrive(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.done.complete(());
        }
    }

    /// Waits until every task arrived. Returns false on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.done.wait_timeout(timeout).is_some() || self.done.is_complete()
    }
}
