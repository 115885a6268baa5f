//! Bucket memory manager.
//!
//! Each bucket owns one `Arc<dyn MemoryManager>` and touches it only while
//! holding the bucket's exclusive lock, so an implementation may freely
//! use non-thread-safe internals. `HeapMemoryManager` is the only
//! production implementation; the trait exists as a behavioral extension
//! point for alternative allocators.

use thiserror::Error;

/// An allocation owned by a `MemoryManager`. `Handle` itself holds the
/// backing buffer directly rather than indexing into a shared arena, so a
/// `CacheEntry` carrying a `Handle` across buckets (the table's
/// cross-bucket rename path) moves it — never copies it.
pub struct Handle {
    buffer: Vec<u8>,
}

impl Handle {
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn span(&self, offset: usize, length: usize) -> Result<&[u8], MemoryError> {
        self.buffer
            .get(offset..offset + length)
            .ok_or(MemoryError::OutOfBounds)
    }

    pub fn span_mut(&mut self, offset: usize, length: usize) -> Result<&mut [u8], MemoryError> {
        self.buffer
            .get_mut(offset..offset + length)
            .ok_or(MemoryError::OutOfBounds)
    }

    /// A pinned view from `offset` to the end of the buffer.
    pub fn pin(&self, offset: usize) -> Result<&[u8], MemoryError> {
        self.buffer.get(offset..).ok_or(MemoryError::OutOfBounds)
    }
}

/// Contract for a per-bucket allocator.
pub trait MemoryManager: Send + Sync {
    fn alloc_handle(&self, size: usize) -> Result<Handle, MemoryError>;

    /// Grow-only: a `new_size <= handle.size()` is a no-op.
    fn resize_handle(&self, handle: &mut Handle, new_size: usize) -> Result<(), MemoryError>;

    fn free_handle(&self, handle: Handle) {
        drop(handle);
    }

    fn handle_size(&self, handle: &Handle) -> usize {
        handle.size()
    }
}

/// The default memory manager: one `Vec<u8>` per handle. `Vec` already
/// zero-initializes on allocation and on growth, so `zero_on_alloc` only
/// documents intent here; it exists so a pooling allocator swapped in
/// later has a toggle to honor.
pub struct HeapMemoryManager {
    pub bucket_id: u32,
    pub zero_on_alloc: bool,
}

impl HeapMemoryManager {
    pub fn new(bucket_id: u32, zero_on_alloc: bool) -> Self {
        Self {
            bucket_id,
            zero_on_alloc,
        }
    }
}

impl MemoryManager for HeapMemoryManager {
    fn alloc_handle(&self, size: usize) -> Result<Handle, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }
        Ok(Handle {
            buffer: vec![0u8; size],
        })
    }

    fn resize_handle(&self, handle: &mut Handle, new_size: usize) -> Result<(), MemoryError> {
        if new_size <= handle.buffer.len() {
            return Ok(());
        }
        handle.buffer.resize(new_size, 0);
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("requested allocation size is invalid")]
    InvalidSize,
    #[error("span offset/length out of bounds for this handle")]
    OutOfBounds,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_handle_produces_requested_size() {
        let mgr = HeapMemoryManager::new(0, true);
        let handle = mgr.alloc_handle(4096).unwrap();
        assert_eq!(handle.size(), 4096);
    }

    #[test]
    fn alloc_zero_size_is_rejected() {
        let mgr = HeapMemoryManager::new(0, true);
        assert_eq!(mgr.alloc_handle(0), Err(MemoryError::InvalidSize));
    }

    #[test]
    fn resize_is_grow_only() {
        let mgr = HeapMemoryManager::new(0, true);
        let mut handle = mgr.alloc_handle(128).unwrap();
        mgr.resize_handle(&mut handle, 64).unwrap();
        assert_eq!(handle.size(), 128, "shrink request must be a no-op");

        mgr.resize_handle(&mut handle, 256).unwrap();
        assert_eq!(handle.size(), 256);
    }

    #[test]
    fn span_out_of_bounds_is_rejected() {
        let mgr = HeapMemoryManager::new(0, true);
        let handle = mgr.alloc_handle(16).unwrap();
        assert_eq!(handle.span(10, 10), Err(MemoryError::OutOfBounds));
    }
}
