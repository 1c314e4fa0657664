//! Cancelable trailing-edge debouncer.
//!
//! Each `schedule` call replaces any run that has not started yet, so a
//! burst of triggers collapses into one execution. A zero delay defers to
//! the next scheduler tick. A run that already started is never aborted.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Default)]
struct DebounceState {
    generation: u64,
    pending: Option<(u64, JoinHandle<()>)>,
}

pub struct Debouncer {
    name: &'static str,
    delay: Duration,
    state: Arc<Mutex<DebounceState>>,
}

impl Debouncer {
    pub fn new(name: &'static str, delay: Duration) -> Self {
        Self {
            name,
            delay,
            state: Arc::new(Mutex::new(DebounceState::default())),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `run` after the delay, replacing any pending run.
    pub fn schedule<F, Fut>(&self, run: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.generation += 1;
        let generation = state.generation;
        if let Some((_, handle)) = state.pending.take() {
            handle.abort();
        }

        let shared = Arc::clone(&self.state);
        let delay = self.delay;
        let name = self.name;
        let handle = tokio::spawn(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            {
                let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                let current = state.pending.as_ref().map(|(pending, _)| *pending);
                if current != Some(generation) {
                    return;
                }
                state.pending = None;
            }
            trace!(debouncer = name, "Debounced run starting");
            run().await;
        });
        state.pending = Some((generation, handle));
    }

    /// Drop the pending run, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.pending.take() {
            Some((_, handle)) => {
                handle.abort();
                trace!(debouncer = self.name, "Debounced run cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .is_some()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
