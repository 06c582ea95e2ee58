//! Per-request memoization.
//!
//! One [`RequestScope`] accompanies every request through the cache
//! service. It carries the strategy decision (made at most once per scope)
//! and a bounded memo of per-key lookup results, positive and negative, so
//! the same durable-store query is never issued twice within a request.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::domain::{CacheEntry, EntryKey};

use super::lock::mutex_lock;
use super::strategy::LoadingStrategy;

const SOURCE: &str = "cache::request";

pub struct RequestScope {
    inner: Mutex<ScopeInner>,
}

struct ScopeInner {
    strategy: Option<LoadingStrategy>,
    preload_done: bool,
    lookups: LruCache<EntryKey, Option<CacheEntry>>,
}

impl RequestScope {
    pub fn new(memo_limit: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(ScopeInner {
                strategy: None,
                preload_done: false,
                lookups: LruCache::new(memo_limit),
            }),
        }
    }

    pub(crate) fn strategy(&self) -> Option<LoadingStrategy> {
        mutex_lock(&self.inner, SOURCE, "strategy").strategy
    }

    pub(crate) fn set_strategy(&self, strategy: LoadingStrategy) {
        mutex_lock(&self.inner, SOURCE, "set_strategy").strategy = Some(strategy);
    }

    /// True once the eager preload has been verified for this scope.
    pub(crate) fn preload_done(&self) -> bool {
        mutex_lock(&self.inner, SOURCE, "preload_done").preload_done
    }

    pub(crate) fn mark_preload_done(&self) {
        mutex_lock(&self.inner, SOURCE, "mark_preload_done").preload_done = true;
    }

    /// Memoized lookup result; outer `None` means "not asked yet", inner
    /// `None` is a memoized miss.
    pub(crate) fn memo_get(&self, key: &EntryKey) -> Option<Option<CacheEntry>> {
        mutex_lock(&self.inner, SOURCE, "memo_get")
            .lookups
            .get(key)
            .cloned()
    }

    pub(crate) fn memo_put(&self, key: EntryKey, value: Option<CacheEntry>) {
        mutex_lock(&self.inner, SOURCE, "memo_put")
            .lookups
            .put(key, value);
    }

    /// Drop a memoized result after the underlying row changes.
    pub(crate) fn memo_invalidate(&self, key: &EntryKey) {
        mutex_lock(&self.inner, SOURCE, "memo_invalidate")
            .lookups
            .pop(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntryStats;

    fn scope() -> RequestScope {
        RequestScope::new(NonZeroUsize::new(4).expect("limit"))
    }

    fn key(file: &str) -> EntryKey {
        EntryKey::new(1, "local", "d", file)
    }

    #[test]
    fn memoizes_hits_and_misses() {
        let scope = scope();
        let k = key("a_1e.jpg");

        assert!(scope.memo_get(&k).is_none());

        scope.memo_put(k.clone(), None);
        assert_eq!(scope.memo_get(&k), Some(None));

        let entry = CacheEntry::new(k.clone(), EntryStats::default(), None);
        scope.memo_put(k.clone(), Some(entry.clone()));
        assert_eq!(scope.memo_get(&k), Some(Some(entry)));

        scope.memo_invalidate(&k);
        assert!(scope.memo_get(&k).is_none());
    }

    #[test]
    fn strategy_is_latched() {
        let scope = scope();
        assert!(scope.strategy().is_none());
        scope.set_strategy(LoadingStrategy::Selective);
        assert_eq!(scope.strategy(), Some(LoadingStrategy::Selective));
    }

    #[test]
    fn memo_is_bounded() {
        let scope = scope();
        for i in 0..10 {
            scope.memo_put(key(&format!("f{i}.jpg")), None);
        }
        // Oldest entries fell out of the LRU window.
        assert!(scope.memo_get(&key("f0.jpg")).is_none());
        assert!(scope.memo_get(&key("f9.jpg")).is_some());
    }
}
