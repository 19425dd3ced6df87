//! Configuration Module
//!
//! Configuration loading for the aggregator service.

mod settings;

pub use settings::{
    AggregatorConfig, ConfigError, DEFAULT_OBSERVER_QUEUE_CAPACITY, DeliverySettings,
    ServerSettings, TickSource,
};
