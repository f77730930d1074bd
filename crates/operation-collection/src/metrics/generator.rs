// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metrics extraction from completed traces.
//!
//! A [`MetricsGenerator`] tracks one operation type. For a completed trace it
//! picks the frames of that type ([`MetricsGenerator::external_frames`],
//! innermost per path by default) and produces:
//!
//! 1. endpoint bags, attributed to the trace's own resource key, through
//!    [`MetricsGenerator::endpoint_metrics`];
//! 2. one external-resource bag per selected frame, attributed to the key
//!    from [`MetricsGenerator::external_resource_key`], carrying a duration
//!    timer plus whatever [`MetricsGenerator::external_resource_metrics`] adds.
//!
//! No matching frame means no bags.

use crate::metrics::bag::MetricsBag;
use crate::operation::OperationType;
use crate::resource::ResourceKey;
use crate::trace::{Frame, Trace};

pub const COUNTER_SUFFIX: &str = ":type=counter";
pub const TIMER_SUFFIX: &str = ":type=timer";

pub trait MetricsGenerator: Send + Sync {
    fn operation_type(&self) -> OperationType;

    fn external_frames<'t>(&self, trace: &'t Trace) -> Vec<&'t Frame> {
        trace.last_frames_of_type(self.operation_type())
    }

    fn external_resource_key(&self, frame: &Frame) -> ResourceKey {
        let operation = frame.operation();
        ResourceKey::external(format!("{}:{}", operation.op_type(), operation.label()))
    }

    fn endpoint_metrics(
        &self,
        _trace: &Trace,
        _endpoint: &ResourceKey,
        _external_frames: &[&Frame],
    ) -> Vec<MetricsBag> {
        Vec::new()
    }

    fn external_resource_metrics(&self, _trace: &Trace, _frame: &Frame, _bag: &mut MetricsBag) {}

    fn generate(&self, trace: &Trace) -> Vec<MetricsBag> {
        generate_metrics(self, trace)
    }
}

pub fn generate_metrics<G: MetricsGenerator + ?Sized>(generator: &G, trace: &Trace) -> Vec<MetricsBag> {
    let frames = generator.external_frames(trace);
    if frames.is_empty() {
        return Vec::new();
    }

    let mut bags = generator.endpoint_metrics(trace, trace.resource_key(), &frames);
    let timer_key = format!("{}{}", generator.operation_type(), TIMER_SUFFIX);
    for frame in &frames {
        let mut bag = MetricsBag::create(generator.external_resource_key(frame), frame.range());
        bag.add_timer(&timer_key, frame.range().duration());
        generator.external_resource_metrics(trace, frame, &mut bag);
        bags.push(bag);
    }
    bags
}

/// Counts calls of one operation type: the endpoint gets the number of
/// selected frames, each external resource gets one per frame.
#[derive(Debug, Clone)]
pub struct CounterMetricsGenerator {
    op_type: OperationType,
    metric_key: String,
}

impl CounterMetricsGenerator {
    pub fn new(op_type: OperationType) -> Self {
        Self {
            op_type,
            metric_key: format!("{}{}", op_type, COUNTER_SUFFIX),
        }
    }

    pub fn metric_key(&self) -> &str {
        &self.metric_key
    }
}

impl MetricsGenerator for CounterMetricsGenerator {
    fn operation_type(&self) -> OperationType {
        self.op_type
    }

    fn endpoint_metrics(
        &self,
        trace: &Trace,
        endpoint: &ResourceKey,
        external_frames: &[&Frame],
    ) -> Vec<MetricsBag> {
        if external_frames.is_empty() {
            return Vec::new();
        }
        let mut bag = MetricsBag::create(endpoint.clone(), trace.range());
        bag.add_counter(&self.metric_key, external_frames.len() as u64);
        vec![bag]
    }

    fn external_resource_metrics(&self, _trace: &Trace, _frame: &Frame, bag: &mut MetricsBag) {
        bag.add_counter(&self.metric_key, 1);
    }
}
