mod engine;
mod memory;

pub use engine::{PutRequest, RedisResourceStorage, CLEANUP_BULK_SIZE, MAX_EXPIRE_IN_MILLIS};
pub use memory::{calculate_current_memory_usage, MemoryUsageCell};
