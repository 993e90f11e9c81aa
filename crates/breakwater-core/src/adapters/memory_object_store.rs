//! In-memory object store with fault injection.

use crate::object_store::{
    compute_checksum, validate_key, verify_checksum, ObjectMeta, ObjectStore, ObjectStoreError,
    PutOptions, StoredObject,
};
use crate::Timestamp;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Per-operation call counters
#[derive(Debug, Default)]
struct CallCounters {
    puts: AtomicU64,
    gets: AtomicU64,
    deletes: AtomicU64,
    lists: AtomicU64,
    heads: AtomicU64,
}

/// In-memory [`ObjectStore`] for tests and local development
///
/// Supports injecting unavailability, bounded failure bursts, and
/// artificial latency so breaker and probe behavior can be exercised
/// deterministically.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    counters: CallCounters,
    unavailable: AtomicBool,
    fail_budget: AtomicU64,
    latency_ms: AtomicU64,
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`ObjectStoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` operations, then recover
    pub fn fail_next(&self, count: u64) {
        self.fail_budget.store(count, Ordering::SeqCst);
    }

    /// Delay every operation by `latency` before answering
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Operations attempted since creation, including failed ones
    pub fn total_calls(&self) -> u64 {
        self.counters.puts.load(Ordering::SeqCst)
            + self.counters.gets.load(Ordering::SeqCst)
            + self.counters.deletes.load(Ordering::SeqCst)
            + self.counters.lists.load(Ordering::SeqCst)
            + self.counters.heads.load(Ordering::SeqCst)
    }

    /// Put operations attempted
    pub fn put_calls(&self) -> u64 {
        self.counters.puts.load(Ordering::SeqCst)
    }

    /// Get operations attempted
    pub fn get_calls(&self) -> u64 {
        self.counters.gets.load(Ordering::SeqCst)
    }

    /// Delete operations attempted
    pub fn delete_calls(&self) -> u64 {
        self.counters.deletes.load(Ordering::SeqCst)
    }

    /// List operations attempted
    pub fn list_calls(&self) -> u64 {
        self.counters.lists.load(Ordering::SeqCst)
    }

    /// Head operations attempted
    pub fn head_calls(&self) -> u64 {
        self.counters.heads.load(Ordering::SeqCst)
    }

    /// Number of stored objects
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Check whether a key currently holds an object
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    /// Apply injected latency and failures before touching the map
    async fn admit(&self) -> Result<(), ObjectStoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Unavailable {
                message: "injected outage".to_string(),
            });
        }

        // Decrement the failure budget without going below zero under
        // concurrent callers.
        let mut budget = self.fail_budget.load(Ordering::SeqCst);
        while budget > 0 {
            match self.fail_budget.compare_exchange(
                budget,
                budget - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Err(ObjectStoreError::Unavailable {
                        message: "injected failure".to_string(),
                    });
                }
                Err(current) => budget = current,
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        options: PutOptions,
    ) -> Result<ObjectMeta, ObjectStoreError> {
        self.counters.puts.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;
        validate_key(key)?;

        let meta = ObjectMeta {
            key: key.to_string(),
            size_bytes: data.len() as u64,
            content_type: options.content_type,
            checksum: compute_checksum(&data),
            metadata: options.metadata,
            created_at: Timestamp::now(),
        };

        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                meta: meta.clone(),
                data,
            },
        );
        Ok(meta)
    }

    async fn get(&self, key: &str) -> Result<StoredObject, ObjectStoreError> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;
        validate_key(key)?;

        let objects = self.objects.read().await;
        let object = objects
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound {
                key: key.to_string(),
            })?;

        if !verify_checksum(&object.data, &object.meta.checksum) {
            return Err(ObjectStoreError::ChecksumMismatch {
                key: key.to_string(),
                expected: object.meta.checksum.clone(),
                actual: compute_checksum(&object.data),
            });
        }

        Ok(object)
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;
        validate_key(key)?;

        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectMeta>, ObjectStoreError> {
        self.counters.lists.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;

        let objects = self.objects.read().await;
        let mut metas: Vec<ObjectMeta> = objects
            .values()
            .filter(|object| object.meta.key.starts_with(prefix))
            .map(|object| object.meta.clone())
            .collect();
        metas.sort_by(|a, b| a.key.cmp(&b.key));
        metas.truncate(limit);
        Ok(metas)
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta, ObjectStoreError> {
        self.counters.heads.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;
        validate_key(key)?;

        self.objects
            .read()
            .await
            .get(key)
            .map(|object| object.meta.clone())
            .ok_or_else(|| ObjectStoreError::NotFound {
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
#[path = "memory_object_store_tests.rs"]
mod tests;
