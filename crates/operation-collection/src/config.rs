// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ConfigError;
use std::env;

const DEFAULT_MAX_FRAMES: usize = 10_000;
const DEFAULT_WINDOW_SECS: u64 = 10;
const DEFAULT_MAX_CONTEXTS: usize = 10_000;

/// Configuration of the operation collector and its metrics aggregation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// When false every capture primitive is a no-op
    pub enabled: bool,
    /// Frames recorded per trace before further enters are dropped
    pub max_frames_per_trace: usize,
    /// Width of the aggregation windows, in seconds
    pub metrics_window_secs: u64,
    /// Distinct (resource, window) buckets the aggregator may hold
    pub max_metric_contexts: usize,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_frames_per_trace: DEFAULT_MAX_FRAMES,
            metrics_window_secs: DEFAULT_WINDOW_SECS,
            max_metric_contexts: DEFAULT_MAX_CONTEXTS,
            log_level: "info".to_string(),
        }
    }
}

impl CollectorConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let enabled = env::var("OPCOLLECT_ENABLED")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(true);
        let max_frames_per_trace = parse_env("OPCOLLECT_MAX_FRAMES", DEFAULT_MAX_FRAMES)?;
        let metrics_window_secs =
            parse_env("OPCOLLECT_METRICS_WINDOW_SECS", DEFAULT_WINDOW_SECS)?;
        let max_metric_contexts =
            parse_env("OPCOLLECT_MAX_METRIC_CONTEXTS", DEFAULT_MAX_CONTEXTS)?;
        let log_level = env::var("OPCOLLECT_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            enabled,
            max_frames_per_trace,
            metrics_window_secs,
            max_metric_contexts,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frames_per_trace == 0 {
            return Err(ConfigError::Invalid(
                "max frames per trace must be greater than 0".to_string(),
            ));
        }
        if self.metrics_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "metrics window must be greater than 0".to_string(),
            ));
        }
        if self.max_metric_contexts == 0 {
            return Err(ConfigError::Invalid(
                "max metric contexts must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid(format!("{} is not a valid number: '{}'", name, val))),
        Err(_) => Ok(default),
    }
}
