//! CacheEntry: a single owned buffer laid out as
//! `[time:i64-BE | length:i32-BE | payload | slack]`.

use std::sync::Arc;
use thiserror::Error;

use crate::memory::{Handle, MemoryError, MemoryManager};

const TIME_OFFSET: usize = 0;
const TIME_SIZE: usize = 8;
const LENGTH_OFFSET: usize = 8;
const LENGTH_SIZE: usize = 4;
pub const HEADER_SIZE: usize = TIME_SIZE + LENGTH_SIZE;

const PAGE_SIZE: usize = 4096;

fn round_up_to_page(n: usize) -> usize {
    n.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// A binary blob with an embedded timestamp and length header, owned 1:1
/// by whichever bucket holds its key. Ownership transfers — never copies —
/// on rename across buckets.
pub struct CacheEntry {
    handle: Option<Handle>,
    mem: Arc<dyn MemoryManager>,
    length: usize,
}

impl CacheEntry {
    /// `Create(payload, mem_mgr) -> entry`.
    pub fn create(payload: &[u8], mem: Arc<dyn MemoryManager>, time: i64) -> Result<Self, EntryError> {
        let buffer_size = round_up_to_page(HEADER_SIZE + payload.len());
        let mut handle = mem.alloc_handle(buffer_size)?;
        handle
            .span_mut(TIME_OFFSET, TIME_SIZE)?
            .copy_from_slice(&time.to_be_bytes());
        handle
            .span_mut(LENGTH_OFFSET, LENGTH_SIZE)?
            .copy_from_slice(&(payload.len() as i32).to_be_bytes());
        handle
            .span_mut(HEADER_SIZE, payload.len())?
            .copy_from_slice(payload);
        Ok(Self {
            handle: Some(handle),
            mem,
            length: payload.len(),
        })
    }

    fn handle(&self) -> Result<&Handle, EntryError> {
        self.handle.as_ref().ok_or(EntryError::Disposed)
    }

    fn handle_mut(&mut self) -> Result<&mut Handle, EntryError> {
        self.handle.as_mut().ok_or(EntryError::Disposed)
    }

    pub fn get_time(&self) -> Result<i64, EntryError> {
        let span = self.handle()?.span(TIME_OFFSET, TIME_SIZE)?;
        Ok(i64::from_be_bytes(span.try_into().unwrap()))
    }

    pub fn set_time(&mut self, time: i64) -> Result<(), EntryError> {
        self.handle_mut()?
            .span_mut(TIME_OFFSET, TIME_SIZE)?
            .copy_from_slice(&time.to_be_bytes());
        Ok(())
    }

    pub fn get_length(&self) -> Result<usize, EntryError> {
        self.handle()?;
        Ok(self.length)
    }

    /// `GetDataSegment() -> span`.
    pub fn data_segment(&self) -> Result<&[u8], EntryError> {
        let length = self.length;
        Ok(self.handle()?.span(HEADER_SIZE, length)?)
    }

    /// `UpdateData(payload)`. Grows the buffer only if `payload` exceeds
    /// current capacity; never shrinks.
    pub fn update_data(&mut self, payload: &[u8]) -> Result<(), EntryError> {
        let needed = HEADER_SIZE + payload.len();
        let current_size = self.handle()?.size();
        if needed > current_size {
            let new_size = round_up_to_page(needed);
            let mem = self.mem.clone();
            mem.resize_handle(self.handle_mut()?, new_size)?;
        }
        self.handle_mut()?
            .span_mut(HEADER_SIZE, payload.len())?
            .copy_from_slice(payload);
        self.handle_mut()?
            .span_mut(LENGTH_OFFSET, LENGTH_SIZE)?
            .copy_from_slice(&(payload.len() as i32).to_be_bytes());
        self.length = payload.len();
        Ok(())
    }

    /// Total buffer capacity, including header and slack. Exposed so the
    /// invariant "payload fits without reallocation" is testable.
    pub fn buffer_size(&self) -> Result<usize, EntryError> {
        Ok(self.handle()?.size())
    }

    /// Explicit early release. Idempotent; safe to call more than once.
    /// After this, every accessor returns `EntryError::Disposed`.
    pub fn dispose(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.mem.free_handle(handle);
        }
    }
}

impl Drop for CacheEntry {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("cache entry has already been disposed")]
    Disposed,
    #[error("memory manager error: {0}")]
    Memory(#[from] MemoryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HeapMemoryManager;

    fn mgr() -> Arc<dyn MemoryManager> {
        Arc::new(HeapMemoryManager::new(0, true))
    }

    #[test]
    fn create_stores_payload_and_time() {
        let entry = CacheEntry::create(&[0x01, 0x02, 0x03], mgr(), 42).unwrap();
        assert_eq!(entry.get_time().unwrap(), 42);
        assert_eq!(entry.get_length().unwrap(), 3);
        assert_eq!(entry.data_segment().unwrap(), &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn set_time_round_trips() {
        let mut entry = CacheEntry::create(b"x", mgr(), 0).unwrap();
        entry.set_time(1_700_000_000).unwrap();
        assert_eq!(entry.get_time().unwrap(), 1_700_000_000);
    }

    #[test]
    fn update_data_within_capacity_does_not_reallocate() {
        let mut entry = CacheEntry::create(&[0u8; 10], mgr(), 0).unwrap();
        let original_size = entry.buffer_size().unwrap();

        entry.update_data(&[0xAA; 20]).unwrap();

        assert_eq!(entry.buffer_size().unwrap(), original_size);
        assert_eq!(entry.get_length().unwrap(), 20);
        assert_eq!(entry.data_segment().unwrap(), &[0xAA; 20]);
    }

    #[test]
    fn update_data_beyond_capacity_grows() {
        let mut entry = CacheEntry::create(&[0u8; 10], mgr(), 0).unwrap();
        let original_size = entry.buffer_size().unwrap();

        let big_payload = vec![0xBB; original_size * 2];
        entry.update_data(&big_payload).unwrap();

        assert!(entry.buffer_size().unwrap() >= big_payload.len() + HEADER_SIZE);
        assert_eq!(entry.data_segment().unwrap(), big_payload.as_slice());
    }

    #[test]
    fn dispose_fails_subsequent_accessors() {
        let mut entry = CacheEntry::create(b"x", mgr(), 0).unwrap();
        entry.dispose();
        assert_eq!(entry.get_time(), Err(EntryError::Disposed));
        assert_eq!(entry.get_length(), Err(EntryError::Disposed));
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut entry = CacheEntry::create(b"x", mgr(), 0).unwrap();
        entry.dispose();
        entry.dispose();
        assert_eq!(entry.get_time(), Err(EntryError::Disposed));
    }

    #[test]
    fn buffer_size_is_rounded_to_page() {
        let entry = CacheEntry::create(&[0u8; 1], mgr(), 0).unwrap();
        assert_eq!(entry.buffer_size().unwrap() % 4096, 0);
    }
}
