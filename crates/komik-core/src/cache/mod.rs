//! Response caching primitives.
//!
//! - [`store`]: the TTL store with FIFO/LRU capacity eviction
//! - [`key`]: deterministic request fingerprints
//! - [`pattern`]: glob matching used by invalidation and listing

pub mod key;
pub mod pattern;
pub mod store;

pub use key::{ParsedKey, fingerprint, normalize_query, parse_fingerprint};
pub use pattern::KeyPattern;
pub use store::{
    CacheEntry, CacheHit, CacheStats, CacheStore, EntryInfo, EntryPage, EntryQuery,
    EvictionPolicy, Weigh,
};
