//! Bucket: a stable numeric id paired with an async-exclusive lock over a
//! `BlobCache`.
//!
//! Using `tokio::sync::Mutex` rather than `std::sync::Mutex` is load
//! bearing: a session task may be cancelled mid-await while holding this
//! lock (client disconnect, shutdown), and `tokio::sync::Mutex` releases
//! cleanly on cancellation where a std mutex held across an await point
//! would not compile at all.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::blob_cache::{BlobCache, CacheError, PersistenceHook};
use crate::memory::MemoryManager;

pub struct Bucket {
    pub id: u32,
    cache: Mutex<BlobCache>,
}

impl Bucket {
    pub fn new(
        id: u32,
        max_capacity: usize,
        mem: Arc<dyn MemoryManager>,
        persistence: Arc<dyn PersistenceHook>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            id,
            cache: Mutex::new(BlobCache::new(id, max_capacity, mem, persistence)?),
        })
    }

    pub async fn lock(&self) -> MutexGuard<'_, BlobCache> {
        self.cache.lock().await
    }
}
