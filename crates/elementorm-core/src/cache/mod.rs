//! Dependency-aware result cache.
//!
//! Entries carry a TTL, access statistics, and a set of dependency tags. The
//! store keeps a reverse index from tag to keys so that changing an element
//! type or entity can drop every derived payload without scanning the cache.

mod entry;
mod error;
mod key;
mod manager;
mod policy;
mod store;

pub use entry::CacheEntry;
pub use error::CacheError;
pub use key::{CacheKey, ALL_TYPES_DEPENDENCY};
pub use manager::{CacheManager, CacheStats, InvalidationCallback};
pub use policy::EvictionPolicy;
pub use store::{CacheStore, InsertOutcome, Lookup};
