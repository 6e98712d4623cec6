use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::types::MetaStore;

#[derive(Debug, Clone, Default)]
pub struct MemoryMetaStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    revision: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Debug, Default)]
struct Inner {
    revision: u64,
    kv: BTreeMap<String, Entry>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(inner: &mut Inner) -> u64 {
        inner.revision = inner.revision.saturating_add(1);
        inner.revision
    }
}

#[async_trait::async_trait]
impl MetaStore for MemoryMetaStore {
    async fn put(&self, key: &str, value: Vec<u8>, ttl_ms: Option<u64>) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        // drop expired entries so the map does not grow with dead keys
        inner.kv.retain(|_, e| e.is_live(now));

        let rev = Self::next_revision(&mut inner);
        inner.kv.insert(
            key.to_string(),
            Entry {
                value,
                revision: rev,
                expires_at: ttl_ms.map(|ms| now + Duration::from_millis(ms)),
            },
        );
        Ok(rev)
    }

    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>> {
        let inner = self.inner.read().await;
        let now = Instant::now();
        Ok(inner
            .kv
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| (e.value.clone(), e.revision)))
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        inner.kv.remove(key);
        Ok(Self::next_revision(&mut inner))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>, u64)>> {
        let inner = self.inner.read().await;
        let now = Instant::now();
        let out = inner
            .kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, e)| (k.clone(), e.value.clone(), e.revision))
            .collect();
        Ok(out)
    }
}
