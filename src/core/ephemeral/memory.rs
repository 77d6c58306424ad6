//! In-process ephemeral store with lazy expiry

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{EphemeralError, EphemeralStore, ttl_millis};

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

/// DashMap-backed store. Expired entries are dropped when touched.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys, for inspection in tests
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| e.is_live(now))
            .map(|e| e.key().clone())
            .collect()
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), EphemeralError> {
        ttl_millis(ttl)?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, EphemeralError> {
        let now = Instant::now();
        let found = self
            .entries
            .get(key)
            .map(|e| e.is_live(now).then(|| e.value.clone()));

        match found {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, e| !e.is_live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, EphemeralError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, EphemeralError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.exists("k").await.unwrap());
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = MemoryStore::new();
        store.set("k", "one", Duration::from_secs(60)).await.unwrap();
        store.set("k", "two", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!store.exists("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let store = MemoryStore::new();
        let result = store.set("k", "v", Duration::ZERO).await;
        assert!(matches!(result, Err(EphemeralError::InvalidTtl(_))));
    }

    #[tokio::test]
    async fn test_concurrent_delete_has_single_winner() {
        let store = Arc::new(MemoryStore::new());
        store.set("code", "1", Duration::from_secs(60)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.delete("code").await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
