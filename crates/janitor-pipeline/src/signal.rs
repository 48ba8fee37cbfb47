//! Single-slot, saturating wait/notify gate.
//!
//! A [`Signal`] is either set or clear. [`Signal::set`] hands the signal to
//! the oldest pending waiter, or latches the flag when nobody is waiting.
//! Setting an already-set signal is a no-op, so signals never accumulate.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct SignalState {
  signaled: bool,
  next_waiter_id: u64,
  waiters: VecDeque<Waiter>,
}

#[derive(Debug)]
struct Waiter {
  id: u64,
  wake: oneshot::Sender<()>,
}

/// A registered waiter that has not observed its outcome yet.
///
/// Dropping it early (the wait future lost a `select!`) removes the
/// registration, and passes on a wake it already received but never saw.
struct PendingWait<'a> {
  signal: &'a Signal,
  id: u64,
  wake: oneshot::Receiver<()>,
  finished: bool,
}

impl Drop for PendingWait<'_> {
  fn drop(&mut self) {
    if self.finished || self.signal.deregister(self.id) {
      return;
    }
    if self.wake.try_recv().is_ok() {
      self.signal.set();
    }
  }
}

/// A saturating, FIFO-fair asynchronous signal.
#[derive(Debug, Default)]
pub struct Signal {
  state: Mutex<SignalState>,
}

impl Signal {
  /// Create a new signal in the clear state.
  pub fn new() -> Self {
    Self::default()
  }

  /// Create a new signal that starts set.
  pub fn new_set() -> Self {
    let signal = Self::new();
    signal.lock().signaled = true;
    signal
  }

  fn lock(&self) -> MutexGuard<'_, SignalState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Wait for the signal.
  ///
  /// Returns `true` when the signal was consumed and `false` when the timeout
  /// elapsed first. `None` waits without a deadline; a zero timeout never
  /// suspends.
  pub async fn wait(&self, timeout: Option<Duration>) -> bool {
    let mut pending = {
      let mut state = self.lock();
      if state.signaled {
        state.signaled = false;
        return true;
      }
      if timeout.is_some_and(|t| t.is_zero()) {
        return false;
      }

      let (tx, rx) = oneshot::channel();
      let id = state.next_waiter_id;
      state.next_waiter_id = state.next_waiter_id.wrapping_add(1);
      state.waiters.push_back(Waiter { id, wake: tx });
      PendingWait {
        signal: self,
        id,
        wake: rx,
        finished: false,
      }
    };

    let woken = match timeout {
      None => (&mut pending.wake).await.is_ok(),
      Some(timeout) => match tokio::time::timeout(timeout, &mut pending.wake).await {
        Ok(result) => result.is_ok(),
        // `set` may have dequeued this waiter right before the deadline; the
        // wake is then already in flight and must be taken.
        Err(_) if self.deregister(pending.id) => false,
        Err(_) => (&mut pending.wake).await.is_ok(),
      },
    };

    pending.finished = true;
    woken
  }

  fn deregister(&self, id: u64) -> bool {
    let mut state = self.lock();
    match state.waiters.iter().position(|w| w.id == id) {
      Some(position) => {
        state.waiters.remove(position);
        true
      }
      None => false,
    }
  }

  /// Set the signal.
  ///
  /// Wakes exactly the oldest live waiter, leaving the flag untouched. With no
  /// live waiters the flag is latched.
  pub fn set(&self) {
    loop {
      let waiter = {
        let mut state = self.lock();
        match state.waiters.pop_front() {
          Some(waiter) => waiter,
          None => {
            state.signaled = true;
            return;
          }
        }
      };

      // Woken outside the lock. A dropped receiver means the waiter went away
      // (its future was cancelled), so the signal moves on to the next one.
      if waiter.wake.send(()).is_ok() {
        return;
      }
    }
  }

  /// Whether the flag is currently latched.
  pub fn is_set(&self) -> bool {
    self.lock().signaled
  }

  /// Number of registered waiters.
  pub fn waiter_count(&self) -> usize {
    self.lock().waiters.len()
  }
}
