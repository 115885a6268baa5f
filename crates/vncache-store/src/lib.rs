pub mod blob_cache;
pub mod bucket;
pub mod entry;
pub mod events;
pub mod memory;
pub mod table;

pub use blob_cache::{BlobCache, CacheError, NoPersistence, PersistenceHook};
pub use bucket::Bucket;
pub use entry::{CacheEntry, EntryError};
pub use events::{ChangeEvent, ChangeEventFanOut, ChangeKind, DropOldestReceiver, DropOldestSender};
pub use memory::{Handle, HeapMemoryManager, MemoryError, MemoryManager};
pub use table::{bucket_index, CacheTable, EntryView, TableError};
