pub mod event_bus;
pub mod events;
pub mod redis_bus;

pub use event_bus::{BusError, EventBus};
pub use events::{DbChangeEvent, TaskUpdateEvent, DB_CHANGES_TOPIC, TASK_UPDATES_TOPIC};
pub use redis_bus::RedisEventBus;
