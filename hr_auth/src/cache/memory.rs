//! In-process cache backend.
//!
//! Suitable for a single server instance and for tests. Uses the tokio clock,
//! so paused-time tests can elapse TTLs with `tokio::time::advance`.

use super::{CacheError, CacheResult, SharedCache, WindowOutcome};
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug)]
struct Window {
    length: Duration,
    hits: VecDeque<Instant>,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.duration_since(oldest) >= self.length {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Window count at which a check first sweeps stale windows
const MIN_SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug)]
struct State {
    entries: HashMap<String, Entry>,
    windows: HashMap<String, Window>,
    sweep_threshold: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            windows: HashMap::new(),
            sweep_threshold: MIN_SWEEP_THRESHOLD,
        }
    }
}

impl State {
    /// Drop windows with no hits left once the map has doubled since the
    /// last sweep, so distinct keys cannot pile up between purges.
    fn sweep_windows_if_due(&mut self, now: Instant) {
        if self.windows.len() < self.sweep_threshold {
            return;
        }
        self.windows.retain(|_, window| {
            window.prune(now);
            !window.hits.is_empty()
        });
        self.sweep_threshold = (self.windows.len() * 2).max(MIN_SWEEP_THRESHOLD);
    }

    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        let expired = self.entries.get(key).is_some_and(|e| !e.is_live(now));
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }
}

/// Cache held in process memory behind a single async mutex
#[derive(Clone, Default)]
pub struct MemoryCache {
    state: Arc<Mutex<State>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut state = self.state.lock().await;
        Ok(state.live(key, Instant::now()).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut state = self.state.lock().await;
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        Ok(state
            .entries
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if state.live(key, now).is_some() {
            return Ok(false);
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some(entry) = state.live(key, now) {
            let current: i64 = entry
                .value
                .parse()
                .map_err(|_| CacheError::NotACounter(key.to_string()))?;
            let next = current + 1;
            entry.value = next.to_string();
            return Ok(next);
        }

        state.entries.insert(
            key.to_string(),
            Entry {
                value: "1".to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(1)
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        Ok(state
            .live(key, now)
            .map(|e| e.expires_at.saturating_duration_since(now)))
    }

    async fn sliding_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> CacheResult<WindowOutcome> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.sweep_windows_if_due(now);

        let entry = state.windows.entry(key.to_string()).or_insert_with(|| Window {
            length: window,
            hits: VecDeque::new(),
        });
        entry.length = window;
        entry.prune(now);

        let allowed = (entry.hits.len() as u32) < limit;
        if allowed {
            entry.hits.push_back(now);
        }

        let reset_after = entry
            .hits
            .front()
            .map(|&oldest| (oldest + window).saturating_duration_since(now))
            .unwrap_or(window);

        let count = entry.hits.len() as u32;
        if count == 0 {
            state.windows.remove(key);
        }

        Ok(WindowOutcome {
            allowed,
            count,
            reset_after,
        })
    }

    async fn purge_expired(&self) -> CacheResult<u64> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let before = state.entries.len() + state.windows.len();
        state.entries.retain(|_, entry| entry.is_live(now));
        state.windows.retain(|_, window| {
            window.prune(now);
            !window.hits.is_empty()
        });
        let after = state.entries.len() + state.windows.len();

        Ok((before - after) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_set_get_expires() {
        let cache = MemoryCache::new();
        cache.set("k", "v", MINUTE).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        advance(MINUTE).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_respects_live_entries() {
        let cache = MemoryCache::new();
        assert!(cache.set_if_absent("k", "a", MINUTE).await.unwrap());
        assert!(!cache.set_if_absent("k", "b", MINUTE).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("a"));

        advance(MINUTE).await;
        assert!(cache.set_if_absent("k", "c", MINUTE).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_keeps_first_expiry() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr_with_expiry("n", MINUTE).await.unwrap(), 1);

        advance(Duration::from_secs(40)).await;
        assert_eq!(cache.incr_with_expiry("n", MINUTE).await.unwrap(), 2);
        assert_eq!(
            cache.ttl("n").await.unwrap(),
            Some(Duration::from_secs(20))
        );

        advance(Duration::from_secs(20)).await;
        assert_eq!(cache.incr_with_expiry("n", MINUTE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_incr_on_text_fails() {
        let cache = MemoryCache::new();
        cache.set("k", "text", MINUTE).await.unwrap();
        let err = cache.incr_with_expiry("k", MINUTE).await.unwrap_err();
        assert!(matches!(err, CacheError::NotACounter(_)));
    }

    #[tokio::test]
    async fn test_delete_reports_live_entry() {
        let cache = MemoryCache::new();
        cache.set("k", "v", MINUTE).await.unwrap();
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_prunes_old_hits() {
        let cache = MemoryCache::new();
        for _ in 0..3 {
            assert!(cache.sliding_window("w", 3, MINUTE).await.unwrap().allowed);
            advance(Duration::from_secs(10)).await;
        }

        let blocked = cache.sliding_window("w", 3, MINUTE).await.unwrap();
        assert!(!blocked.allowed);
        assert_eq!(blocked.count, 3);
        assert_eq!(blocked.reset_after, Duration::from_secs(30));

        advance(Duration::from_secs(30)).await;
        let outcome = cache.sliding_window("w", 3, MINUTE).await.unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_windows_swept_without_purge() {
        let cache = MemoryCache::new();
        for i in 0..MIN_SWEEP_THRESHOLD {
            cache
                .sliding_window(&format!("ip:{i}"), 5, Duration::from_secs(1))
                .await
                .unwrap();
        }

        advance(Duration::from_secs(2)).await;
        cache
            .sliding_window("ip:fresh", 5, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(cache.state.lock().await.windows.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = MemoryCache::new();
        cache.set("a", "1", Duration::from_secs(1)).await.unwrap();
        cache.set("b", "1", MINUTE).await.unwrap();
        cache.sliding_window("w", 1, Duration::from_secs(1)).await.unwrap();

        advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired().await.unwrap(), 2);
        assert!(cache.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_incr_is_atomic() {
        let cache = MemoryCache::new();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.incr_with_expiry("n", MINUTE).await.unwrap()
            }));
        }

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=20).collect::<Vec<_>>());
    }
}
