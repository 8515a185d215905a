//! Shared building blocks for Herald: the notification data model, error
//! taxonomy, configuration, connection pools, and the storage and queue
//! ports with their adapters.

pub mod config;
pub mod db;
pub mod error;
pub mod queue;
pub mod redis_pool;
pub mod store;
pub mod types;
