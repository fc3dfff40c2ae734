//! Background jobs for feed-service

pub mod fanout_worker;
pub mod redis_health;

pub use fanout_worker::{FanoutQueue, FanoutWorkerPool};
