// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::resource::ResourceKey;
use crate::trace::TimeRange;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Accumulated value of one metric key. Both kinds merge commutatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricValue {
    Counter {
        value: u64,
    },
    Timer {
        count: u64,
        total_nanos: u64,
        max_nanos: u64,
    },
}

impl MetricValue {
    fn timer(duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self::Timer {
            count: 1,
            total_nanos: nanos,
            max_nanos: nanos,
        }
    }

    /// Folds `other` into `self`. Returns `false` on a kind mismatch, leaving
    /// `self` untouched.
    fn merge(&mut self, other: &MetricValue) -> bool {
        match (self, other) {
            (Self::Counter { value }, Self::Counter { value: more }) => {
                *value = value.saturating_add(*more);
                true
            }
            (
                Self::Timer {
                    count,
                    total_nanos,
                    max_nanos,
                },
                Self::Timer {
                    count: other_count,
                    total_nanos: other_total,
                    max_nanos: other_max,
                },
            ) => {
                *count = count.saturating_add(*other_count);
                *total_nanos = total_nanos.saturating_add(*other_total);
                *max_nanos = (*max_nanos).max(*other_max);
                true
            }
            _ => false,
        }
    }
}

/// Metrics for one resource over one time range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsBag {
    resource_key: ResourceKey,
    range: TimeRange,
    metrics: BTreeMap<String, MetricValue>,
}

impl MetricsBag {
    pub fn create(resource_key: ResourceKey, range: TimeRange) -> Self {
        Self {
            resource_key,
            range,
            metrics: BTreeMap::new(),
        }
    }

    pub fn resource_key(&self) -> &ResourceKey {
        &self.resource_key
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    pub fn add_counter(&mut self, key: &str, increment: u64) {
        self.add(key, MetricValue::Counter { value: increment });
    }

    pub fn add_timer(&mut self, key: &str, duration: Duration) {
        self.add(key, MetricValue::timer(duration));
    }

    pub fn get(&self, key: &str) -> Option<&MetricValue> {
        self.metrics.get(key)
    }

    pub fn counter(&self, key: &str) -> Option<u64> {
        match self.metrics.get(key)? {
            MetricValue::Counter { value } => Some(*value),
            MetricValue::Timer { .. } => None,
        }
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Merges every metric of `other` into this bag. The range is left as is.
    pub fn absorb(&mut self, other: &MetricsBag) {
        for (key, value) in &other.metrics {
            self.add(key, *value);
        }
    }

    fn add(&mut self, key: &str, value: MetricValue) {
        match self.metrics.get_mut(key) {
            Some(existing) => {
                if !existing.merge(&value) {
                    warn!(
                        "Metric {} on {} already holds a different kind, dropping sample",
                        key, self.resource_key
                    );
                }
            }
            None => {
                self.metrics.insert(key.to_string(), value);
            }
        }
    }
}
