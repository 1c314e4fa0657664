//! Cache session state shared by every background producer.
//!
//! The `stopped` flag suppresses all background writes. Exclusive
//! operations (rebuild, teardown) save the previous value with
//! [`CacheSession::set_stopped`] and restore it explicitly when they finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use notecache_core::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct CacheSession {
    stopped: Arc<AtomicBool>,
}

impl CacheSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether background work must stop (hot path, lock-free).
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Set the flag and return the previous value.
    pub fn set_stopped(&self, stopped: bool) -> bool {
        let previous = self.stopped.swap(stopped, Ordering::AcqRel);
        if previous != stopped {
            debug!(subsystem = "session", stopped, "Cache session flag changed");
        }
        previous
    }

    /// `Err(Error::Stopped)` when the session is stopped.
    pub fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            Err(Error::Stopped)
        } else {
            Ok(())
        }
    }
}
