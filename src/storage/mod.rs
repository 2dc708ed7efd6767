pub mod file_lock;
pub mod layout;
pub mod object_store;

pub use file_lock::{LockGuard, LockManager};
pub use layout::StorageLayout;
pub use object_store::{FilesystemObjectStore, ObjectStore, SearchExcerpt, SearchMatch};
