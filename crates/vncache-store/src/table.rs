//! Cache table and table operations: routes a key to a bucket by a
//! deterministic 4-byte fingerprint, and implements
//! `Get`/`AddOrUpdate`/`Delete` against the routed bucket(s).
//!
//! Cross-bucket `TryChangeKey` must take both bucket locks in a single,
//! deterministic order — ascending `bucket_id` — or two renames crossing
//! in opposite directions can deadlock. This is the one place in the
//! store where the lock ordering is a hand-written invariant rather than
//! structurally impossible to violate.

use std::sync::Arc;

use thiserror::Error;

use crate::blob_cache::{CacheError, NoPersistence, PersistenceHook};
use crate::bucket::Bucket;
use crate::entry::{CacheEntry, EntryError};
use crate::memory::{HeapMemoryManager, MemoryManager};

/// Computes the bucket index for `key` from `{k[0], k[len/2], k[1],
/// k[len-1]}` packed as a little-endian `u32`, modulo `bucket_count`.
/// Keys shorter than 4 bytes have no well-defined fingerprint and are
/// rejected.
pub fn bucket_index(key: &str, bucket_count: u32) -> Result<u32, TableError> {
    let bytes = key.as_bytes();
    if bytes.len() < 4 {
        return Err(TableError::InvalidKey);
    }
    let mid = bytes.len() / 2;
    let fingerprint = [bytes[0], bytes[mid], bytes[1], bytes[bytes.len() - 1]];
    Ok(u32::from_le_bytes(fingerprint) % bucket_count)
}

/// An owned snapshot of an entry's visible fields, returned by table
/// operations once the bucket lock that protected the live `CacheEntry`
/// has been released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryView {
    pub time: i64,
    pub data: Vec<u8>,
}

pub struct CacheTable {
    buckets: Vec<Arc<Bucket>>,
}

impl CacheTable {
    /// Builds a table of `bucket_count` buckets, each bounded to
    /// `max_entries_per_bucket` and backed by its own `HeapMemoryManager`.
    pub fn new(
        bucket_count: u32,
        max_entries_per_bucket: usize,
        zero_on_alloc: bool,
    ) -> Result<Self, TableError> {
        Self::with_persistence(
            bucket_count,
            max_entries_per_bucket,
            zero_on_alloc,
            &|_bucket_id| Arc::new(NoPersistence),
        )
    }

    pub fn with_persistence(
        bucket_count: u32,
        max_entries_per_bucket: usize,
        zero_on_alloc: bool,
        persistence_for: &dyn Fn(u32) -> Arc<dyn PersistenceHook>,
    ) -> Result<Self, TableError> {
        if bucket_count == 0 {
            return Err(TableError::InvalidBucketCount);
        }
        let mut buckets = Vec::with_capacity(bucket_count as usize);
        for id in 0..bucket_count {
            let mem: Arc<dyn MemoryManager> = Arc::new(HeapMemoryManager::new(id, zero_on_alloc));
            buckets.push(Arc::new(Bucket::new(
                id,
                max_entries_per_bucket,
                mem,
                persistence_for(id),
            )?));
        }
        Ok(Self { buckets })
    }

    pub fn bucket_count(&self) -> u32 {
        self.buckets.len() as u32
    }

    fn bucket(&self, key: &str) -> Result<&Arc<Bucket>, TableError> {
        let idx = bucket_index(key, self.bucket_count())?;
        Ok(&self.buckets[idx as usize])
    }

    /// `Get(id) -> entry?`.
    pub async fn get(&self, key: &str) -> Result<Option<EntryView>, TableError> {
        let bucket = self.bucket(key)?;
        let mut guard = bucket.lock().await;
        let Some(entry) = guard.try_get(key) else {
            return Ok(None);
        };
        Ok(Some(view_of(entry)?))
    }

    /// `AddOrUpdate(id, payload, time)`. Updates in place (growing the
    /// buffer only if needed) when the key already exists; otherwise
    /// creates a fresh entry.
    pub async fn add_or_update(&self, key: &str, payload: &[u8], time: i64) -> Result<(), TableError> {
        let bucket = self.bucket(key)?;
        let mut guard = bucket.lock().await;
        if let Some(entry) = guard.get_mut(key) {
            entry.update_data(payload)?;
            entry.set_time(time)?;
        } else {
            let mem = guard.memory_manager();
            let entry = CacheEntry::create(payload, mem, time)?;
            guard.add(key.to_string(), entry);
        }
        Ok(())
    }

    /// `Delete(id) -> bool`.
    pub async fn delete(&self, key: &str) -> Result<bool, TableError> {
        let bucket = self.bucket(key)?;
        let mut guard = bucket.lock().await;
        Ok(guard.remove(key))
    }

    /// `TryChangeKey(old, new) -> bool`. Moves the entry's buffer without
    /// copying it, even when `old` and `new` route to different buckets.
    pub async fn try_change_key(&self, old_key: &str, new_key: &str) -> Result<bool, TableError> {
        let old_idx = bucket_index(old_key, self.bucket_count())?;
        let new_idx = bucket_index(new_key, self.bucket_count())?;

        if old_idx == new_idx {
            let mut guard = self.buckets[old_idx as usize].lock().await;
            return Ok(guard.try_change_key(old_key, new_key).is_some());
        }

        let (first_idx, second_idx) = if old_idx < new_idx {
            (old_idx, new_idx)
        } else {
            (new_idx, old_idx)
        };
        let mut first_guard = self.buckets[first_idx as usize].lock().await;
        let mut second_guard = self.buckets[second_idx as usize].lock().await;

        let (old_guard, new_guard) = if old_idx == first_idx {
            (&mut first_guard, &mut second_guard)
        } else {
            (&mut second_guard, &mut first_guard)
        };

        let Some(entry) = old_guard.take(old_key) else {
            return Ok(false);
        };
        new_guard.add(new_key.to_string(), entry);
        Ok(true)
    }

    /// `TryChangeKey(old, new)` folded with an immediate data/time
    /// overwrite under the same lock acquisition(s) -- a renaming
    /// `AddOrUpdate` is one atomic operation, so a concurrent `Get` can
    /// never observe the new key holding the stale pre-overwrite payload.
    /// An empty `payload` leaves the moved entry's data untouched.
    pub async fn try_change_key_and_update(
        &self,
        old_key: &str,
        new_key: &str,
        payload: &[u8],
        time: i64,
    ) -> Result<bool, TableError> {
        let old_idx = bucket_index(old_key, self.bucket_count())?;
        let new_idx = bucket_index(new_key, self.bucket_count())?;

        if old_idx == new_idx {
            let mut guard = self.buckets[old_idx as usize].lock().await;
            if guard.try_change_key(old_key, new_key).is_none() {
                return Ok(false);
            }
            if !payload.is_empty() {
                let entry = guard.get_mut(new_key).expect("key just moved to new_key");
                entry.update_data(payload)?;
                entry.set_time(time)?;
            }
            return Ok(true);
        }

        let (first_idx, second_idx) = if old_idx < new_idx {
            (old_idx, new_idx)
        } else {
            (new_idx, old_idx)
        };
        let mut first_guard = self.buckets[first_idx as usize].lock().await;
        let mut second_guard = self.buckets[second_idx as usize].lock().await;

        let (old_guard, new_guard) = if old_idx == first_idx {
            (&mut first_guard, &mut second_guard)
        } else {
            (&mut second_guard, &mut first_guard)
        };

        let Some(mut entry) = old_guard.take(old_key) else {
            return Ok(false);
        };
        if !payload.is_empty() {
            entry.update_data(payload)?;
            entry.set_time(time)?;
        }
        new_guard.add(new_key.to_string(), entry);
        Ok(true)
    }

    pub async fn clear(&self) {
        for bucket in &self.buckets {
            bucket.lock().await.clear();
        }
    }
}

fn view_of(entry: &CacheEntry) -> Result<EntryView, TableError> {
    Ok(EntryView {
        time: entry.get_time()?,
        data: entry.data_segment()?.to_vec(),
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("key must be at least 4 bytes long")]
    InvalidKey,
    #[error("bucket_count must be at least 1")]
    InvalidBucketCount,
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("entry error: {0}")]
    Entry(#[from] EntryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_index_rejects_short_keys() {
        assert_eq!(bucket_index("abc", 16), Err(TableError::InvalidKey));
    }

    #[test]
    fn bucket_index_is_deterministic() {
        let a = bucket_index("hello1234", 16).unwrap();
        let b = bucket_index("hello1234", 16).unwrap();
        assert_eq!(a, b);
        assert!(a < 16);
    }

    #[tokio::test]
    async fn round_trip_get_returns_stored_payload() {
        let table = CacheTable::new(16, 1024, true).unwrap();
        table.add_or_update("hello1234", &[0x01, 0x02, 0x03], 1000).await.unwrap();

        let view = table.get("hello1234").await.unwrap().unwrap();
        assert_eq!(view.data, vec![0x01, 0x02, 0x03]);
        assert_eq!(view.time, 1000);
    }

    #[tokio::test]
    async fn rename_within_same_bucket_preserves_payload() {
        let table = CacheTable::new(1, 1024, true).unwrap();
        table.add_or_update("alpha1234", b"payload", 1).await.unwrap();

        assert!(table.try_change_key("alpha1234", "beta5678").await.unwrap());
        assert!(table.get("alpha1234").await.unwrap().is_none());
        assert_eq!(table.get("beta5678").await.unwrap().unwrap().data, b"payload");
    }

    #[tokio::test]
    async fn rename_across_buckets_preserves_payload() {
        let table = CacheTable::new(16, 1024, true).unwrap();
        table.add_or_update("aaaa0001", b"cross-bucket", 1).await.unwrap();

        assert_ne!(
            bucket_index("aaaa0001", 16).unwrap(),
            bucket_index("zzzz9999", 16).unwrap(),
            "fixture keys must actually land in different buckets"
        );

        assert!(table.try_change_key("aaaa0001", "zzzz9999").await.unwrap());
        assert!(table.get("aaaa0001").await.unwrap().is_none());
        assert_eq!(table.get("zzzz9999").await.unwrap().unwrap().data, b"cross-bucket");
    }

    #[tokio::test]
    async fn try_change_key_and_update_overwrites_payload_within_same_bucket() {
        let table = CacheTable::new(1, 1024, true).unwrap();
        table.add_or_update("alpha1234", b"old", 1).await.unwrap();

        assert!(table
            .try_change_key_and_update("alpha1234", "beta5678", b"new", 2)
            .await
            .unwrap());
        assert!(table.get("alpha1234").await.unwrap().is_none());
        let view = table.get("beta5678").await.unwrap().unwrap();
        assert_eq!(view.data, b"new");
        assert_eq!(view.time, 2);
    }

    #[tokio::test]
    async fn try_change_key_and_update_overwrites_payload_across_buckets() {
        let table = CacheTable::new(16, 1024, true).unwrap();
        table.add_or_update("aaaa0001", b"old", 1).await.unwrap();

        assert!(table
            .try_change_key_and_update("aaaa0001", "zzzz9999", b"new", 2)
            .await
            .unwrap());
        assert!(table.get("aaaa0001").await.unwrap().is_none());
        let view = table.get("zzzz9999").await.unwrap().unwrap();
        assert_eq!(view.data, b"new");
        assert_eq!(view.time, 2);
    }

    #[tokio::test]
    async fn try_change_key_and_update_empty_payload_leaves_data_untouched() {
        let table = CacheTable::new(1, 1024, true).unwrap();
        table.add_or_update("alpha1234", b"untouched", 1).await.unwrap();

        assert!(table
            .try_change_key_and_update("alpha1234", "beta5678", b"", 2)
            .await
            .unwrap());
        let view = table.get("beta5678").await.unwrap().unwrap();
        assert_eq!(view.data, b"untouched");
        assert_eq!(view.time, 1);
    }

    #[tokio::test]
    async fn try_change_key_and_update_missing_source_key_is_a_no_op() {
        let table = CacheTable::new(4, 1024, true).unwrap();
        assert!(!table
            .try_change_key_and_update("nosuchkey", "beta5678", b"x", 1)
            .await
            .unwrap());
        assert!(table.get("beta5678").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_or_update_grows_entry_in_place_without_losing_data() {
        let table = CacheTable::new(4, 1024, true).unwrap();
        table.add_or_update("key10000", &[0u8; 10], 1).await.unwrap();
        table.add_or_update("key10000", &[0xAB; 5000], 2).await.unwrap();

        let view = table.get("key10000").await.unwrap().unwrap();
        assert_eq!(view.data, vec![0xAB; 5000]);
        assert_eq!(view.time, 2);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let table = CacheTable::new(4, 1024, true).unwrap();
        table.add_or_update("key10000", b"x", 1).await.unwrap();
        assert!(table.delete("key10000").await.unwrap());
        assert!(table.get("key10000").await.unwrap().is_none());
        assert!(!table.delete("key10000").await.unwrap());
    }

    #[tokio::test]
    async fn lru_eviction_drops_oldest_entry_in_its_bucket() {
        let table = CacheTable::new(1, 1024, true).unwrap();
        for i in 0..1024 {
            let key = format!("key{i:05}");
            table.add_or_update(&key, b"v", i as i64).await.unwrap();
        }
        table.add_or_update("keyoverflow", b"v", 9999).await.unwrap();

        assert!(table.get("key00000").await.unwrap().is_none());
        assert!(table.get("keyoverflow").await.unwrap().is_some());
    }
}
