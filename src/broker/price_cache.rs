//! Process-wide price cache (spec §4.B.2).
//!
//! `account_id -> (symbol, price_type) -> (price, timestamp)`, with a per-key
//! lock serialising misses so that N racing callers for the same key trigger
//! exactly one provider call. The outer key->slot map uses the teacher's
//! `parking_lot` lock (short, synchronous critical section); each slot's
//! entry uses a `tokio::sync::Mutex` held across the provider call itself —
//! spec §4.B.2 explicitly allows holding the lock across the fetch, which is
//! the only way to make "exactly one call per miss" true under real races.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum PriceType {
    Bid,
    Ask,
    Mid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    account_id: i64,
    symbol_idx: u64,
    price_type: PriceType,
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    price: f64,
    fetched_at: DateTime<Utc>,
}

/// A per-key lock slot: holds the last known value (if any) and serialises
/// concurrent misses on that exact key. The lock is a `tokio::sync::Mutex` so
/// it can be held across the provider call's `.await`.
struct KeySlot {
    entry: tokio::sync::Mutex<Option<CacheEntry>>,
}

/// Owning singleton, created once at startup and shared via `Arc` (spec §9:
/// "each is wrapped in a small owning type with a process-wide singleton").
pub struct PriceCache {
    ttl: chrono::Duration,
    slots: parking_lot::Mutex<HashMap<(i64, String, PriceType), Arc<KeySlot>>>,
}

impl PriceCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: chrono::Duration::seconds(ttl_secs as i64),
            slots: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, account_id: i64, symbol: &str, price_type: PriceType) -> Arc<KeySlot> {
        let mut slots = self.slots.lock();
        slots
            .entry((account_id, symbol.to_string(), price_type))
            .or_insert_with(|| {
                Arc::new(KeySlot {
                    entry: tokio::sync::Mutex::new(None),
                })
            })
            .clone()
    }

    /// Serves a hit younger than the TTL without calling `fetch`; otherwise
    /// calls `fetch` once per miss even if N callers race on the same key.
    /// The per-key `tokio::sync::Mutex` is held across the `fetch().await`
    /// call itself: every racing caller queues on the same lock, and whoever
    /// acquires it after the first filled the entry sees a fresh hit on its
    /// own re-check and never calls `fetch` at all.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        account_id: i64,
        symbol: &str,
        price_type: PriceType,
        fetch: F,
    ) -> anyhow::Result<f64>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<f64>>,
    {
        let slot = self.slot(account_id, symbol, price_type);
        let mut guard = slot.entry.lock().await;
        if let Some(entry) = *guard {
            if Utc::now() - entry.fetched_at < self.ttl {
                return Ok(entry.price);
            }
        }
        let price = fetch().await?;
        *guard = Some(CacheEntry {
            price,
            fetched_at: Utc::now(),
        });
        Ok(price)
    }

    /// Bulk form: partitions `symbols` into cache hits and misses, returning
    /// the merged result. `fetch_missing` receives only the miss list and
    /// issues one provider call for all of them (spec §4.B.2 bulk form).
    pub async fn get_or_fetch_bulk<F, Fut>(
        &self,
        account_id: i64,
        symbols: &[String],
        price_type: PriceType,
        fetch_missing: F,
    ) -> anyhow::Result<HashMap<String, f64>>
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<HashMap<String, f64>>>,
    {
        let mut result = HashMap::new();
        let mut misses = Vec::new();
        for symbol in symbols {
            let slot = self.slot(account_id, symbol, price_type);
            let cached = {
                let guard = slot.entry.lock().await;
                guard.filter(|e| Utc::now() - e.fetched_at < self.ttl).map(|e| e.price)
            };
            match cached {
                Some(price) => {
                    result.insert(symbol.clone(), price);
                }
                None => misses.push(symbol.clone()),
            }
        }
        if !misses.is_empty() {
            let fetched = fetch_missing(misses.clone()).await?;
            for symbol in misses {
                if let Some(price) = fetched.get(&symbol).copied() {
                    let slot = self.slot(account_id, &symbol, price_type);
                    let mut guard = slot.entry.lock().await;
                    *guard = Some(CacheEntry {
                        price,
                        fetched_at: Utc::now(),
                    });
                    result.insert(symbol, price);
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn serves_hit_without_refetching() {
        let cache = PriceCache::new(60);
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            let price = cache
                .get_or_fetch(1, "AAPL", PriceType::Mid, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(150.0)
                })
                .await
                .unwrap();
            assert_eq!(price, 150.0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_trigger_exactly_one_fetch() {
        let cache = Arc::new(PriceCache::new(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(1, "AAPL", PriceType::Mid, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(150.0)
                    })
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), 150.0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bulk_partitions_hits_and_misses() {
        let cache = PriceCache::new(60);
        cache
            .get_or_fetch(1, "AAPL", PriceType::Mid, || async { Ok(150.0) })
            .await
            .unwrap();
        let symbols = vec!["AAPL".to_string(), "MSFT".to_string()];
        let result = cache
            .get_or_fetch_bulk(1, &symbols, PriceType::Mid, |missing| async move {
                assert_eq!(missing, vec!["MSFT".to_string()]);
                let mut m = HashMap::new();
                m.insert("MSFT".to_string(), 310.0);
                Ok(m)
            })
            .await
            .unwrap();
        assert_eq!(result.get("AAPL"), Some(&150.0));
        assert_eq!(result.get("MSFT"), Some(&310.0));
    }
}
