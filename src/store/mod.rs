//! Persistence layer: instance records behind the async `Storage` trait.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use memory::MemoryStore;
pub use traits::{InstanceRecord, RunningLister, RunningView, Storage, StorageLister};
