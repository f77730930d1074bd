// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::rabbitmq::fields::{ENVELOPE, EXCHANGE, ROUTING_KEY};
use crate::rabbitmq::RabbitPluginOperationType;
use operation_collection::metrics::{CounterMetricsGenerator, MetricsBag, MetricsGenerator};
use operation_collection::operation::{OperationMap, OperationType};
use operation_collection::resource::ResourceKey;
use operation_collection::trace::{Frame, Trace};
use tracing::debug;

/// Counts RabbitMQ calls per request and per broker destination.
///
/// The endpoint of a trace gets `<type>:type=counter` incremented by the
/// number of innermost RabbitMQ frames; each destination, keyed by exchange
/// and routing key, gets one per frame.
#[derive(Debug, Clone)]
pub struct RabbitMetricsGenerator {
    op: RabbitPluginOperationType,
    counter: CounterMetricsGenerator,
}

impl RabbitMetricsGenerator {
    pub fn new(op: RabbitPluginOperationType) -> Self {
        Self {
            op,
            counter: CounterMetricsGenerator::new(op.operation_type()),
        }
    }

    pub fn plugin_operation_type(&self) -> RabbitPluginOperationType {
        self.op
    }

    pub fn metric_key(&self) -> &str {
        self.counter.metric_key()
    }
}

impl MetricsGenerator for RabbitMetricsGenerator {
    fn operation_type(&self) -> OperationType {
        self.counter.operation_type()
    }

    fn external_resource_key(&self, frame: &Frame) -> ResourceKey {
        let operation = frame.operation();
        let envelope = operation.get_as::<&OperationMap>(ENVELOPE).ok().flatten();
        let destination = envelope.and_then(|envelope| {
            let exchange = envelope.get_as::<&str>(EXCHANGE).ok().flatten()?;
            let routing_key = envelope.get_as::<&str>(ROUTING_KEY).ok().flatten()?;
            Some((exchange, routing_key))
        });

        match destination {
            Some((exchange, routing_key)) => ResourceKey::external(format!(
                "{}:exchange={}:routingKey={}",
                self.counter.operation_type(),
                exchange,
                routing_key
            )),
            None => {
                debug!(
                    "No destination on '{}' frame, keying by label",
                    operation.label()
                );
                ResourceKey::external(format!(
                    "{}:{}",
                    operation.op_type(),
                    operation.label()
                ))
            }
        }
    }

    fn endpoint_metrics(
        &self,
        trace: &Trace,
        endpoint: &ResourceKey,
        external_frames: &[&Frame],
    ) -> Vec<MetricsBag> {
        self.counter
            .endpoint_metrics(trace, endpoint, external_frames)
    }

    fn external_resource_metrics(&self, trace: &Trace, frame: &Frame, bag: &mut MetricsBag) {
        self.counter.external_resource_metrics(trace, frame, bag);
    }
}
