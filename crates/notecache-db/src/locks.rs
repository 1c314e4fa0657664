//! Striped per-path write locks.
//!
//! Content writes, diff writes, and rename migrations take the lock for
//! every path they touch. Stripes are always acquired in ascending order,
//! so multi-path callers cannot deadlock each other.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Default number of lock stripes.
pub const DEFAULT_STRIPES: usize = 64;

pub struct PathLocks {
    stripes: Vec<Arc<Mutex<()>>>,
}

/// Held locks. Released on drop.
pub struct PathGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl Default for PathLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl PathLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1))
            .map(|_| Arc::new(Mutex::new(())))
            .collect();
        Self { stripes }
    }

    fn stripe(&self, path: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Lock every stripe covering `paths`.
    pub async fn lock<I, S>(&self, paths: I) -> PathGuard
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut indices: Vec<usize> = paths
            .into_iter()
            .map(|path| self.stripe(path.as_ref()))
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let mut guards = Vec::with_capacity(indices.len());
        for index in indices {
            guards.push(self.stripes[index].clone().lock_owned().await);
        }
        PathGuard { _guards: guards }
    }

    pub async fn lock_one(&self, path: &str) -> PathGuard {
        self.lock([path]).await
    }

    /// Lock every stripe, excluding all path writers.
    pub async fn lock_all(&self) -> PathGuard {
        let mut guards = Vec::with_capacity(self.stripes.len());
        for stripe in &self.stripes {
            guards.push(stripe.clone().lock_owned().await);
        }
        PathGuard { _guards: guards }
    }
}
