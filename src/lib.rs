//! Hierarchical resource storage on Redis.
//!
//! Documents live at filesystem-like paths (`/a/b/c`); every interior
//! segment is an implicit collection. Each operation runs as one atomic
//! server-side Lua script, so a request never exposes intermediate state
//! to concurrent requests.

pub mod compress;
pub mod config;
pub mod lock;
pub mod path;
pub mod redis;
pub mod resource;
pub mod scripts;
pub mod storage;
pub mod stream;

pub use config::StorageConfig;
pub use lock::LockMode;
pub use resource::{CollectionElement, CollectionResource, DocumentResource, Resource};
pub use storage::RedisResourceStorage;
