//! Aggregator Configuration Settings
//!
//! Configuration types for the aggregator, loaded from environment variables.
//! Numeric values fall back to their defaults when unparseable; values that
//! would break delivery or ingestion (a zero queue capacity, an unknown
//! overflow policy or tick source) are rejected.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::domain::subscription::OverflowPolicy;

const HEALTH_PORT: &str = "AGGREGATOR_HEALTH_PORT";
const OBSERVER_QUEUE_CAPACITY: &str = "AGGREGATOR_OBSERVER_QUEUE_CAPACITY";
const OVERFLOW_POLICY: &str = "AGGREGATOR_OVERFLOW_POLICY";
const STATS_INTERVAL_SECS: &str = "AGGREGATOR_STATS_INTERVAL_SECS";
const TICK_SOURCE: &str = "AGGREGATOR_TICK_SOURCE";

/// Default per-subscriber queue capacity.
pub const DEFAULT_OBSERVER_QUEUE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1_024) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Observer delivery settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Capacity of each subscriber's queue.
    pub observer_queue_capacity: NonZeroUsize,
    /// What to do when a subscriber's queue is full.
    pub overflow_policy: OverflowPolicy,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            observer_queue_capacity: DEFAULT_OBSERVER_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::Disconnect,
        }
    }
}

/// Where the process reads ticks from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TickSource {
    /// Newline-delimited JSON ticks on standard input.
    #[default]
    Stdin,
    /// No built-in feed; ticks only arrive through the library API.
    None,
}

impl TickSource {
    /// Parse a source name (case-insensitive).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stdin" => Some(Self::Stdin),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    /// Source name as accepted by [`parse`](Self::parse).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::None => "none",
        }
    }
}

/// Complete aggregator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Observer delivery settings.
    pub delivery: DeliverySettings,
    /// Tick feed.
    pub tick_source: TickSource,
    /// Period of the stats reporter (`None` = disabled).
    pub stats_interval: Option<Duration>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            delivery: DeliverySettings::default(),
            tick_source: TickSource::default(),
            stats_interval: Some(Duration::from_secs(15)),
        }
    }
}

impl AggregatorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a delivery setting is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a zero or non-numeric queue
    /// capacity, an unknown overflow policy or an unknown tick source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server = ServerSettings {
            health_port: parse_or(&lookup, HEALTH_PORT, defaults.server.health_port),
        };

        let observer_queue_capacity = match lookup(OBSERVER_QUEUE_CAPACITY) {
            Some(raw) => raw
                .trim()
                .parse::<NonZeroUsize>()
                .map_err(|_| ConfigError::invalid(OBSERVER_QUEUE_CAPACITY, &raw))?,
            None => defaults.delivery.observer_queue_capacity,
        };

        let overflow_policy = match lookup(OVERFLOW_POLICY) {
            Some(raw) => OverflowPolicy::parse(&raw)
                .ok_or_else(|| ConfigError::invalid(OVERFLOW_POLICY, &raw))?,
            None => defaults.delivery.overflow_policy,
        };

        let tick_source = match lookup(TICK_SOURCE) {
            Some(raw) => {
                TickSource::parse(&raw).ok_or_else(|| ConfigError::invalid(TICK_SOURCE, &raw))?
            }
            None => defaults.tick_source,
        };

        let stats_secs = parse_or(
            &lookup,
            STATS_INTERVAL_SECS,
            defaults.stats_interval.map_or(0, |d| d.as_secs()),
        );
        let stats_interval = (stats_secs > 0).then(|| Duration::from_secs(stats_secs));

        Ok(Self {
            server,
            delivery: DeliverySettings {
                observer_queue_capacity,
                overflow_policy,
            },
            tick_source,
            stats_interval,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable holds a value that cannot be used.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
