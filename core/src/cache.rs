//! Recommendation cache with TTL and single-flight computation.
//!
//! At most one computation runs per key. Concurrent callers for the same
//! key block on a condition variable and receive the value the running
//! computation produces. A forced request never reuses a ready entry but
//! does join a computation already in flight.
//!
//! `reset` starts a new generation. Computations begun before it still
//! return their value to their caller, but the value is not stored.

use crate::{error::PipelineResult, types::UserId, window::TimeWindow};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user_id:        UserId,
    pub window:         TimeWindow,
    pub force_generate: bool,
}

enum Slot<V> {
    InFlight,
    Ready { value: V, stored_at: Instant },
}

struct State<V> {
    ttl:        Duration,
    generation: u64,
    slots:      HashMap<CacheKey, Slot<V>>,
}

pub struct RecommendationCache<V> {
    state: Mutex<State<V>>,
    ready: Condvar,
}

impl<V> std::fmt::Debug for RecommendationCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RecommendationCache")
            .field("ttl", &state.ttl)
            .field("entries", &state.slots.len())
            .finish()
    }
}

impl<V: Clone> RecommendationCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State { ttl, generation: 0, slots: HashMap::new() }),
            ready: Condvar::new(),
        }
    }

    /// Return the cached value for `key`, or run `compute` and cache its
    /// result. The flag is `true` when this call did the computing.
    ///
    /// Errors are never cached. If the computation fails or panics the
    /// slot is released and one waiting caller takes over.
    pub fn get_or_compute<F>(&self, key: &CacheKey, compute: F) -> PipelineResult<(V, bool)>
    where
        F: FnOnce() -> PipelineResult<V>,
    {
        let mut state = self.state.lock();
        let mut joined = false;
        loop {
            let ttl = state.ttl;
            let in_flight = match state.slots.get(key) {
                Some(Slot::InFlight) => true,
                Some(Slot::Ready { value, stored_at })
                    if (joined || !key.force_generate) && stored_at.elapsed() < ttl =>
                {
                    return Ok((value.clone(), false));
                }
                _ => false,
            };
            if !in_flight {
                break;
            }
            joined = true;
            self.ready.wait(&mut state);
        }
        state.slots.insert(key.clone(), Slot::InFlight);
        let generation = state.generation;
        drop(state);

        let mut guard = InFlight { cache: self, key, generation, armed: true };
        let value = compute()?;

        let mut state = self.state.lock();
        guard.armed = false;
        if state.generation == generation {
            state
                .slots
                .insert(key.clone(), Slot::Ready { value: value.clone(), stored_at: Instant::now() });
        } else {
            log::debug!("cache generation moved on, not storing result for {}", key.user_id);
        }
        drop(state);
        self.ready.notify_all();
        Ok((value, true))
    }

    /// Drop every ready entry for `user_id`. In-flight computations finish
    /// normally.
    pub fn invalidate_user(&self, user_id: &str) {
        self.state
            .lock()
            .slots
            .retain(|k, slot| k.user_id != user_id || matches!(slot, Slot::InFlight));
    }

    /// Drop every entry, in-flight ones included, and adopt a new TTL.
    /// Waiters on a dropped in-flight slot compute afresh.
    pub fn reset(&self, ttl: Duration) {
        let mut state = self.state.lock();
        state.ttl = ttl;
        state.generation += 1;
        state.slots.clear();
        drop(state);
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|s| matches!(s, Slot::Ready { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases an in-flight slot if the computation does not complete.
struct InFlight<'a, V> {
    cache: &'a RecommendationCache<V>,
    key:        &'a CacheKey,
    generation: u64,
    armed:      bool,
}

impl<V> Drop for InFlight<'_, V> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.cache.state.lock();
            if state.generation == self.generation
                && matches!(state.slots.get(self.key), Some(Slot::InFlight))
            {
                state.slots.remove(self.key);
            }
            drop(state);
            self.cache.ready.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use chrono::NaiveDate;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    };

    fn key(user: &str, force: bool) -> CacheKey {
        CacheKey {
            user_id: user.into(),
            window: TimeWindow::new(30, NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()).unwrap(),
            force_generate: force,
        }
    }

    #[test]
    fn second_call_is_served_from_cache() {
        let cache = RecommendationCache::new(Duration::from_secs(60));
        let (v, fresh) = cache.get_or_compute(&key("u1", false), || Ok(7)).unwrap();
        assert_eq!((v, fresh), (7, true));
        let (v, fresh) = cache.get_or_compute(&key("u1", false), || Ok(8)).unwrap();
        assert_eq!((v, fresh), (7, false));
    }

    #[test]
    fn expired_entries_are_recomputed() {
        let cache = RecommendationCache::new(Duration::ZERO);
        cache.get_or_compute(&key("u1", false), || Ok(1)).unwrap();
        let (v, fresh) = cache.get_or_compute(&key("u1", false), || Ok(2)).unwrap();
        assert_eq!((v, fresh), (2, true));
    }

    #[test]
    fn forced_requests_skip_ready_entries() {
        let cache = RecommendationCache::new(Duration::from_secs(60));
        cache.get_or_compute(&key("u1", true), || Ok(1)).unwrap();
        let (v, fresh) = cache.get_or_compute(&key("u1", true), || Ok(2)).unwrap();
        assert_eq!((v, fresh), (2, true));
    }

    #[test]
    fn errors_are_not_cached() {
        let cache: RecommendationCache<i32> = RecommendationCache::new(Duration::from_secs(60));
        let err = cache.get_or_compute(&key("u1", false), || {
            Err(PipelineError::System { request_id: "r".into() })
        });
        assert!(err.is_err());
        assert!(cache.is_empty());
        let (v, fresh) = cache.get_or_compute(&key("u1", false), || Ok(3)).unwrap();
        assert_eq!((v, fresh), (3, true));
    }

    #[test]
    fn concurrent_callers_share_one_computation() {
        let cache = Arc::new(RecommendationCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compute(&key("u1", false), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(50));
                            Ok(42)
                        })
                        .unwrap()
                        .0
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_clears_entries() {
        let cache = RecommendationCache::new(Duration::from_secs(60));
        cache.get_or_compute(&key("u1", false), || Ok(1)).unwrap();
        cache.get_or_compute(&key("u2", false), || Ok(1)).unwrap();
        cache.invalidate_user("u1");
        assert_eq!(cache.len(), 1);
        cache.reset(Duration::from_secs(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn results_started_before_a_reset_are_not_stored() {
        let cache = RecommendationCache::new(Duration::from_secs(60));
        let (v, fresh) = cache
            .get_or_compute(&key("u1", false), || {
                cache.reset(Duration::from_secs(60));
                Ok(1)
            })
            .unwrap();
        assert_eq!((v, fresh), (1, true));
        assert!(cache.is_empty());

        let (v, fresh) = cache.get_or_compute(&key("u1", false), || Ok(2)).unwrap();
        assert_eq!((v, fresh), (2, true));
        let (v, fresh) = cache.get_or_compute(&key("u1", false), || Ok(3)).unwrap();
        assert_eq!((v, fresh), (2, false));
    }

    #[test]
    fn waiters_recompute_after_a_reset() {
        let cache = Arc::new(RecommendationCache::new(Duration::from_secs(60)));
        let started = Arc::new(Barrier::new(2));
        let owner = {
            let cache = Arc::clone(&cache);
            let started = Arc::clone(&started);
            std::thread::spawn(move || {
                cache
                    .get_or_compute(&key("u1", false), || {
                        started.wait();
                        std::thread::sleep(Duration::from_millis(100));
                        Ok("old")
                    })
                    .unwrap()
            })
        };
        started.wait();
        cache.reset(Duration::from_secs(60));
        let (v, fresh) = cache.get_or_compute(&key("u1", false), || Ok("new")).unwrap();
        assert_eq!((v, fresh), ("new", true));
        assert_eq!(owner.join().unwrap(), ("old", true));

        let (v, fresh) = cache.get_or_compute(&key("u1", false), || Ok("other")).unwrap();
        assert_eq!((v, fresh), ("new", false));
    }
}
