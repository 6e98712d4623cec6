use anyhow::Result;
use async_trait::async_trait;

/// Key-value store used for process-wide memoized lookups.
///
/// Writes replace the whole value of a key atomically; a reader sees either
/// the previous complete value or the new one. Entries written with a TTL
/// disappear once it elapses.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>, ttl_ms: Option<u64>) -> Result<u64>;
    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>>;
    async fn delete(&self, key: &str) -> Result<u64>;
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>, u64)>>;
}
