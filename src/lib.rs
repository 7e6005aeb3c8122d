pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod failover;
pub mod observability;
pub mod progress;
pub mod ratelimit;
pub mod registry;
