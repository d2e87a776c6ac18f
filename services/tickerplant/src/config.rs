//! Startup configuration for the ticker plant
//!
//! All parameters are externally supplied and validated exactly once
//! while the engine is initializing; a bad value keeps the engine out of
//! service instead of surfacing later on the hot path.

use crate::delivery::DeliveryPolicy;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use types::session::SessionDate;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("log directory must not be empty")]
    EmptyLogDir,

    #[error("invalid {field} endpoint: {value}")]
    InvalidEndpoint { field: &'static str, value: String },

    #[error("subscriber queue capacity must be nonzero")]
    ZeroQueueCapacity,

    #[error("batched delivery interval must be nonzero")]
    ZeroFlushInterval,
}

/// Ticker plant startup parameters.
#[derive(Debug, Clone)]
pub struct PlantConfig {
    /// Directory holding the per-day segment files.
    pub log_dir: PathBuf,
    /// Trading date the session starts on.
    pub session_date: SessionDate,
    /// Delivery policy, fixed for the process lifetime.
    pub delivery: DeliveryPolicy,
    /// Endpoint publishers connect to (owned by the transport layer).
    pub publisher_endpoint: String,
    /// Endpoint subscribers connect to (owned by the transport layer).
    pub subscriber_endpoint: String,
    /// Bounded queue depth per subscriber; overflow drops the subscriber.
    pub subscriber_queue_capacity: usize,
}

impl PlantConfig {
    /// Config with conventional defaults: zero-latency delivery and the
    /// usual local ports.
    pub fn new(log_dir: impl Into<PathBuf>, session_date: SessionDate) -> Self {
        Self {
            log_dir: log_dir.into(),
            session_date,
            delivery: DeliveryPolicy::ZeroLatency,
            publisher_endpoint: "127.0.0.1:5010".to_string(),
            subscriber_endpoint: "127.0.0.1:5011".to_string(),
            subscriber_queue_capacity: 1024,
        }
    }

    pub fn with_delivery(mut self, delivery: DeliveryPolicy) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity;
        self
    }

    /// Validate every field. Called once during engine initialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyLogDir);
        }
        validate_endpoint("publisher", &self.publisher_endpoint)?;
        validate_endpoint("subscriber", &self.subscriber_endpoint)?;
        if self.subscriber_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if let DeliveryPolicy::Batched { interval } = self.delivery {
            if interval == Duration::ZERO {
                return Err(ConfigError::ZeroFlushInterval);
            }
        }
        Ok(())
    }
}

/// Endpoints are `host:port` with a parseable port. Resolution is the
/// transport layer's concern, not checked here.
fn validate_endpoint(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidEndpoint {
        field,
        value: value.to_string(),
    };
    let (host, port) = value.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(())
}
