//! Map API key cache
//!
//! The map/geocoding key is a server-side secret; the frontend asks for it
//! over NATS instead of shipping it in the bundle. The lookup happens once
//! per process behind this holder. Failures are not cached, and `reset`
//! clears a previously served key so a rotated secret can be picked up
//! without a restart.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// Global map key cache singleton
pub static MAP_KEY: Lazy<MapKeyCache> = Lazy::new(MapKeyCache::default);

#[derive(Default)]
pub struct MapKeyCache {
    key: RwLock<Option<String>>,
}

impl MapKeyCache {
    /// Return the cached key, fetching it on first use
    pub fn get_or_fetch(&self) -> Result<String> {
        self.get_or_init_with(fetch_from_env)
    }

    /// Forget the cached key; the next `get_or_fetch` fetches again
    pub fn reset(&self) {
        *self.key.write() = None;
    }

    fn get_or_init_with(&self, fetch: impl FnOnce() -> Result<String>) -> Result<String> {
        if let Some(key) = self.key.read().as_ref() {
            return Ok(key.clone());
        }

        let mut slot = self.key.write();
        // Double-checked: another task may have filled it while we waited
        if let Some(key) = slot.as_ref() {
            return Ok(key.clone());
        }
        let key = fetch()?;
        *slot = Some(key.clone());
        Ok(key)
    }
}

fn fetch_from_env() -> Result<String> {
    std::env::var("MAPS_API_KEY")
        .context("MAPS_API_KEY must be set")
        .and_then(|key| {
            if key.is_empty() {
                anyhow::bail!("MAPS_API_KEY is empty");
            }
            Ok(key)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fetch_happens_once() {
        let cache = MapKeyCache::default();
        let fetches = AtomicU32::new(0);

        for _ in 0..3 {
            let key = cache
                .get_or_init_with(|| {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok("key-1".to_string())
                })
                .unwrap();
            assert_eq!(key, "key-1");
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let cache = MapKeyCache::default();

        let err = cache.get_or_init_with(|| anyhow::bail!("secret store down"));
        assert!(err.is_err());

        // Retry after failure succeeds without a reset
        let key = cache.get_or_init_with(|| Ok("key-2".to_string())).unwrap();
        assert_eq!(key, "key-2");
    }

    #[test]
    fn test_reset_forces_refetch() {
        let cache = MapKeyCache::default();

        cache.get_or_init_with(|| Ok("old".to_string())).unwrap();
        cache.reset();
        let key = cache.get_or_init_with(|| Ok("new".to_string())).unwrap();

        assert_eq!(key, "new");
    }
}
