//! Cache-neutrality control.
//!
//! Every backend's local cache is cleared before every warm-up and measured
//! iteration, so no backend carries memoized results from one iteration into
//! the next. Within an iteration, a key lookup that revisits a key drawn
//! earlier in the same window clears the cache again first, so no backend
//! answers a repeated key from memory. A scenario may opt out only by declaring
//! [`CachePolicy::Retain`] with a reason, which is logged whenever the reset
//! is skipped.

use crate::backends::BackendAdapter;

/// What happens to backend-local caches at iteration boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Clear before every iteration.
    #[default]
    ResetEachIteration,
    /// Keep caches across iterations; the cache itself is under test.
    Retain { reason: &'static str },
}

/// Applies a [`CachePolicy`] to backends and counts the resets it issued.
#[derive(Debug, Default)]
pub struct CacheController {
    resets: u64,
    skipped: u64,
}

impl CacheController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare one backend for the next iteration.
    pub fn prepare(&mut self, policy: CachePolicy, backend: &mut dyn BackendAdapter) {
        match policy {
            CachePolicy::ResetEachIteration => {
                backend.reset_local_cache();
                self.resets += 1;
            }
            CachePolicy::Retain { reason } => {
                tracing::debug!(backend = %backend.kind(), reason, "keeping local cache");
                self.skipped += 1;
            }
        }
    }

    /// Prepare every backend under the same policy.
    pub fn prepare_all(&mut self, policy: CachePolicy, backends: &mut [Box<dyn BackendAdapter>]) {
        for backend in backends.iter_mut() {
            self.prepare(policy, backend.as_mut());
        }
    }

    /// Resets issued so far.
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Resets skipped under [`CachePolicy::Retain`].
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{open_all, BackendKind};
    use crate::config::PoolConfig;
    use crate::fixtures::Dataset;
    use crate::store::FixtureStore;

    #[test]
    fn test_reset_applies_to_every_backend() {
        let store = FixtureStore::with_schema(&PoolConfig::new().with_min_idle(1)).unwrap();
        let data = Dataset::users(20).generate(5);
        store.populate(&data).unwrap();

        let mut backends = open_all(&store, &BackendKind::ALL);
        for backend in backends.iter_mut() {
            backend.select_by_key(&data.users[0].id).unwrap();
        }

        let mut controller = CacheController::new();
        controller.prepare_all(CachePolicy::default(), &mut backends);
        assert_eq!(controller.resets(), 3);

        controller.prepare_all(CachePolicy::Retain { reason: "cache under test" }, &mut backends);
        assert_eq!(controller.resets(), 3);
        assert_eq!(controller.skipped(), 3);
    }

    #[test]
    fn test_reset_forces_store_read_after_purge() {
        let store = FixtureStore::with_schema(&PoolConfig::new().with_min_idle(1)).unwrap();
        let data = Dataset::users(5).generate(6);
        store.populate(&data).unwrap();

        let mut backend = BackendKind::SqlxSession.open(&store);
        let key = &data.users[1].id;
        assert!(backend.select_by_key(key).unwrap().is_some());

        store.purge_all().unwrap();
        CacheController::new().prepare(CachePolicy::default(), backend.as_mut());
        assert!(backend.select_by_key(key).unwrap().is_none());
    }
}
