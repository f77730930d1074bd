// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metrics derived from completed traces.

pub mod aggregator;
pub mod aggregator_service;
mod bag;
mod generator;

pub use aggregator::MetricsAggregator;
pub use aggregator_service::{MetricsAggregatorHandle, MetricsAggregatorService};
pub use bag::{MetricValue, MetricsBag};
pub use generator::{
    generate_metrics, CounterMetricsGenerator, MetricsGenerator, COUNTER_SUFFIX, TIMER_SUFFIX,
};

/// Destination of the bags produced for each completed trace.
pub trait MetricsSink: Send + Sync {
    fn submit(&self, bags: Vec<MetricsBag>);
}
