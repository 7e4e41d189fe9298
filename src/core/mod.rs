//! Domain types and the rate-monitoring pipeline.

pub mod change;
pub mod config;
pub mod dispatch;
pub mod jobs;
pub mod limiter;
pub mod log;
pub mod notification;
pub mod rate;
pub mod schedule;
pub mod store;
pub mod subscription;

pub use rate::{RateObservation, RateSource};
pub use store::RateStore;
pub use subscription::{SubscriberConfig, SubscriberId, SubscriptionRegistry};
