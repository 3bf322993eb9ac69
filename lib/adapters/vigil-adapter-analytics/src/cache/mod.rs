//! Key/value cache backends.

pub mod memory;

pub use memory::MemoryCache;
