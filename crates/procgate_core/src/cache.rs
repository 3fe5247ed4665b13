//! Result cache for opt-in memoization of procedure results.
//!
//! Process-wide and shared across requests. Backed by DashMap so concurrent
//! readers and writers never block each other. There is no single-flight:
//! two identical misses both execute and the last `put` wins.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::{CoercedParameter, ExecutionResult, SqlValue};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<ExecutionResult>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entry for `key`, if any. Expired entries are dropped on the way out.
    pub fn try_get(&self, key: &str) -> Option<Arc<ExecutionResult>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Some(Arc::clone(&entry.value));
            }
        }
        self.entries.remove_if(key, |_, e| e.is_expired(now));
        None
    }

    /// Store `value` under `key` for `ttl`. Replaces any previous entry whole.
    pub fn put(&self, key: String, value: Arc<ExecutionResult>, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key, entry);
    }

    /// Remove every expired entry; returns how many were evicted.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Purge expired entries every `interval` until `cancel` fires.
    /// Spawn it as a background task via `tokio::spawn`.
    pub async fn sweep_every(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        tracing::info!("result cache sweeper started (interval={:?})", interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    let evicted = self.purge_expired();
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.len(), "result cache sweep");
                    }
                }
            }
        }
        tracing::info!("result cache sweeper stopped");
    }
}

/// Deterministic cache key: `schema.procedure:` followed by the JSON of the
/// coerced parameters sorted by name, each value tagged with its native type.
pub fn cache_key(
    schema: &str,
    procedure: &str,
    parameters: &[CoercedParameter],
) -> Result<String, serde_json::Error> {
    let sorted: BTreeMap<&str, &SqlValue> = parameters
        .iter()
        .map(|p| (p.name.as_str(), &p.value))
        .collect();
    Ok(format!(
        "{schema}.{procedure}:{}",
        serde_json::to_string(&sorted)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn param(name: &str, value: SqlValue) -> CoercedParameter {
        CoercedParameter {
            name: name.into(),
            value,
            sql_type: "int".into(),
            is_output: false,
            is_nullable: false,
            raw_text: None,
        }
    }

    fn result(rows: usize) -> Arc<ExecutionResult> {
        Arc::new(ExecutionResult {
            columns: vec!["n".into()],
            rows: (0..rows).map(|i| vec![json!(i)]).collect(),
            row_count: rows,
            column_types: vec![],
        })
    }

    #[test]
    fn key_is_order_independent() {
        let a = [param("b", SqlValue::Int(2)), param("a", SqlValue::Int(1))];
        let b = [param("a", SqlValue::Int(1)), param("b", SqlValue::Int(2))];
        assert_eq!(
            cache_key("sales", "get_orders", &a).unwrap(),
            cache_key("sales", "get_orders", &b).unwrap()
        );
    }

    #[test]
    fn key_distinguishes_native_types() {
        let int = [param("id", SqlValue::Int(7))];
        let text = [param("id", SqlValue::Text("7".into()))];
        assert_ne!(
            cache_key("s", "p", &int).unwrap(),
            cache_key("s", "p", &text).unwrap()
        );
    }

    #[test]
    fn key_includes_procedure_identity() {
        let p = [param("id", SqlValue::Int(7))];
        let key = cache_key("sales", "get_orders", &p).unwrap();
        assert_eq!(key, r#"sales.get_orders:{"id":{"type":"int","value":7}}"#);
        assert_ne!(key, cache_key("sales", "get_invoices", &p).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = ResultCache::new();
        cache.put("k".into(), result(1), Duration::from_secs(300));
        assert!(cache.try_get("k").is_some());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.try_get("k").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.try_get("k").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired() {
        let cache = ResultCache::new();
        cache.put("short".into(), result(1), Duration::from_secs(1));
        cache.put("long".into(), result(1), Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.try_get("long").is_some());
    }

    #[test]
    fn last_writer_wins() {
        let cache = ResultCache::new();
        cache.put("k".into(), result(1), Duration::from_secs(60));
        cache.put("k".into(), result(3), Duration::from_secs(60));
        assert_eq!(cache.try_get("k").unwrap().row_count, 3);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_block_readers() {
        let cache = Arc::new(ResultCache::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.put(format!("k{}", i % 4), result(i), Duration::from_secs(60));
                cache.try_get(&format!("k{}", i % 4)).is_some()
            }));
        }
        for h in handles {
            assert!(h.await.unwrap());
        }
        assert_eq!(cache.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_cancel() {
        let cache = Arc::new(ResultCache::new());
        cache.put("k".into(), result(1), Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&cache).sweep_every(Duration::from_secs(10), cancel.clone()));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(cache.is_empty());
        cancel.cancel();
        task.await.unwrap();
    }
}
