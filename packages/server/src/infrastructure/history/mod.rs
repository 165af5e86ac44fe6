//! History store implementations
//!
//! - `inmemory`: process-local log, the default backend

pub mod inmemory;

pub use inmemory::InMemoryHistoryStore;
