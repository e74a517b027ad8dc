pub mod redis_queue;
pub mod work_queue;

pub use redis_queue::RedisWorkQueue;
pub use work_queue::{QueueError, WorkQueue};
