use super::CacheBackend;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Best-effort notifier that drops a store's inventory cache entries after a
/// committed mutation.
///
/// Invalidation sits outside the transactional boundary: it runs after
/// commit, never before, never on failure, and a failed or slow attempt is
/// logged and swallowed rather than surfaced to the caller.
pub struct CacheInvalidationNotifier {
    backend: Arc<dyn CacheBackend>,
    attempt_timeout: Duration,
    failures: AtomicU64,
}

impl CacheInvalidationNotifier {
    pub fn new(backend: Arc<dyn CacheBackend>, attempt_timeout: Duration) -> Self {
        Self {
            backend,
            attempt_timeout,
            failures: AtomicU64::new(0),
        }
    }

    fn store_key(store_id: i64) -> String {
        format!("inventory:store:{}", store_id)
    }

    /// Invalidate the cached inventory view for one store. Never fails.
    pub async fn invalidate(&self, store_id: i64) {
        let key = Self::store_key(store_id);
        match timeout(self.attempt_timeout, self.backend.delete(&key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(store_id, error = %e, "cache invalidation failed");
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    store_id,
                    timeout_ms = self.attempt_timeout.as_millis() as u64,
                    "cache invalidation timed out"
                );
            }
        }
    }

    /// Number of invalidation attempts that were dropped.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
