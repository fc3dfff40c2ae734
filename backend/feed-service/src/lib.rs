pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod pagination;
pub mod services;

pub use cache::BoundedListCache;
pub use config::Config;
pub use error::{AppError, Result};
pub use pagination::{FeedCursor, Page};
pub use services::{FanoutEngine, NewsFeedService, PostCounterService, TimelineService};
