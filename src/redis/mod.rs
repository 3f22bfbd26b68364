pub mod pool;
pub mod script;
pub mod store;

pub use pool::create_redis_pool;
pub use store::RedisStore;
