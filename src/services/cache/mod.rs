pub mod client;
pub mod memory;

pub use client::{CacheError, CacheResult, CredentialCache};
pub use memory::MemoryCredentialCache;
