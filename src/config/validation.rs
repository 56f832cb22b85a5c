//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and addresses. All
//! problems are reported at once, not just the first.

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is not a valid socket address: {value}")]
    BadAddress { field: &'static str, value: String },

    #[error("upstream.base_url is not a valid URL: {0}")]
    BadUrl(String),

    #[error("retries.max_delay_ms ({max}) is below retries.base_delay_ms ({base})")]
    DelayRange { base: u64, max: u64 },
}

/// Validate a configuration: `GatewayConfig → Result<(), Vec<ValidationError>>`.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut non_zero = |field: &'static str, value: u64| {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    };
    non_zero("circuit_breaker.failure_threshold", config.circuit_breaker.failure_threshold as u64);
    non_zero("circuit_breaker.open_timeout_secs", config.circuit_breaker.open_timeout_secs);
    non_zero("rate_limit.max_requests", config.rate_limit.max_requests as u64);
    non_zero("rate_limit.window_secs", config.rate_limit.window_secs);
    non_zero("rate_limit.eviction_interval_secs", config.rate_limit.eviction_interval_secs);
    non_zero("cache.ttl_secs", config.cache.ttl_secs);
    non_zero("retries.max_attempts", config.retries.max_attempts as u64);
    non_zero("upstream.request_timeout_secs", config.upstream.request_timeout_secs);
    non_zero("upstream.stream_idle_timeout_secs", config.upstream.stream_idle_timeout_secs);
    non_zero("stream.channel_capacity", config.stream.channel_capacity as u64);
    non_zero("stream.max_frame_bytes", config.stream.max_frame_bytes as u64);

    if config.retries.max_delay_ms < config.retries.base_delay_ms {
        errors.push(ValidationError::DelayRange {
            base: config.retries.base_delay_ms,
            max: config.retries.max_delay_ms,
        });
    }

    if url::Url::parse(&config.upstream.base_url).is_err() {
        errors.push(ValidationError::BadUrl(config.upstream.base_url.clone()));
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BadAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::BadAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn test_reports_every_problem() {
        let mut config = GatewayConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        config.cache.ttl_secs = 0;
        config.upstream.base_url = "not a url".into();
        config.listener.bind_address = "localhost".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::Zero {
            field: "circuit_breaker.failure_threshold"
        }));
        assert!(errors.contains(&ValidationError::BadUrl("not a url".into())));
    }

    #[test]
    fn test_delay_cap_below_base() {
        let mut config = GatewayConfig::default();
        config.retries.base_delay_ms = 500;
        config.retries.max_delay_ms = 100;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::DelayRange { base: 500, max: 100 }]);
    }
}
