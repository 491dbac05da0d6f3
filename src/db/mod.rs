pub mod keys;
pub mod memory;
pub mod redis;
pub mod store;

pub use keys::StoreKey;
pub use memory::MemoryStore;
pub use redis::{create_redis_client, RedisStore};
pub use store::{MonthlyUsage, StateStore, WindowSlot, WindowState};
