// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Windowed storage merging metrics bags per resource.

use crate::errors::AggregationError;
use crate::metrics::bag::MetricsBag;
use crate::resource::ResourceKey;
use crate::trace::TimeRange;
use fnv::FnvHasher;
use hashbrown::HashMap;
use std::hash::BuildHasherDefault;

const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BagKey {
    resource_key: ResourceKey,
    window_start_secs: u64,
}

/// One bag per `(resource key, window)`; bags for the same key and window are
/// merged, so insertion order never changes the result.
pub struct MetricsAggregator {
    window_secs: u64,
    max_contexts: usize,
    bags: HashMap<BagKey, MetricsBag, BuildHasherDefault<FnvHasher>>,
}

impl MetricsAggregator {
    pub fn new(window_secs: u64, max_contexts: usize) -> Self {
        Self {
            window_secs: window_secs.max(1),
            max_contexts,
            bags: HashMap::default(),
        }
    }

    pub fn insert(&mut self, bag: &MetricsBag) -> Result<(), AggregationError> {
        let window_start_secs = bag.range().window_start_secs(self.window_secs);
        let key = BagKey {
            resource_key: bag.resource_key().clone(),
            window_start_secs,
        };

        if let Some(existing) = self.bags.get_mut(&key) {
            existing.absorb(bag);
            return Ok(());
        }
        if self.bags.len() >= self.max_contexts {
            return Err(AggregationError::Overflow(self.max_contexts));
        }

        let start = window_start_secs.saturating_mul(NANOS_PER_SEC);
        let end = start
            .saturating_add(self.window_secs.saturating_mul(NANOS_PER_SEC))
            .saturating_sub(1);
        let mut stored = MetricsBag::create(key.resource_key.clone(), TimeRange::new(start, end));
        stored.absorb(bag);
        self.bags.insert(key, stored);
        Ok(())
    }

    pub fn get_entry(&self, resource_key: &ResourceKey, window_start_secs: u64) -> Option<&MetricsBag> {
        self.bags.get(&BagKey {
            resource_key: resource_key.clone(),
            window_start_secs,
        })
    }

    /// Drains every bag, ordered by window then resource.
    pub fn consume_bags(&mut self) -> Vec<MetricsBag> {
        let mut bags: Vec<(BagKey, MetricsBag)> = self.bags.drain().collect();
        bags.sort_by(|(a, _), (b, _)| {
            a.window_start_secs
                .cmp(&b.window_start_secs)
                .then_with(|| a.resource_key.to_string().cmp(&b.resource_key.to_string()))
        });
        bags.into_iter().map(|(_, bag)| bag).collect()
    }

    pub fn len(&self) -> usize {
        self.bags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bags.is_empty()
    }
}
