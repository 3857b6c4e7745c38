pub mod config;
pub mod entry;
pub mod store;

pub use entry::{unix_now, CacheEntry};
pub use store::{CacheKey, CacheStore};
