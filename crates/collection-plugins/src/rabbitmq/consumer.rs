// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::rabbitmq::fields::record_delivery;
use crate::rabbitmq::{
    BasicProperties, Consumer, Envelope, RabbitInstrumentation, RabbitPluginOperationType,
};
use operation_collection::collector::OperationHolder;
use operation_collection::errors::InstrumentationError;
use operation_collection::intercept::{intercept, CollectionAdvice};
use operation_collection::operation::{Operation, OperationType};

struct DeliveryCall<'a> {
    envelope: &'a Envelope,
    props: &'a BasicProperties,
    body: &'a [u8],
}

struct DeliveryAdvice<'a> {
    holder: &'a OperationHolder,
}

impl CollectionAdvice<DeliveryCall<'_>, ()> for DeliveryAdvice<'_> {
    fn operation_type(&self) -> OperationType {
        RabbitPluginOperationType::Consume.operation_type()
    }

    fn label(&self, _call: &DeliveryCall<'_>) -> String {
        RabbitPluginOperationType::Consume.label().to_string()
    }

    fn fill(
        &self,
        call: &DeliveryCall<'_>,
        operation: &mut Operation,
    ) -> Result<(), InstrumentationError> {
        record_delivery(operation, call.envelope, call.props, call.body)
    }

    fn untraced_holder(&self) -> Option<&OperationHolder> {
        Some(self.holder)
    }
}

/// A [`Consumer`] recording each delivery as a consume operation.
pub struct InstrumentedConsumer<C> {
    inner: C,
    instrumentation: RabbitInstrumentation,
}

impl<C: Consumer> InstrumentedConsumer<C> {
    pub fn new(inner: C, instrumentation: RabbitInstrumentation) -> Self {
        Self {
            inner,
            instrumentation,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: Consumer> Consumer for InstrumentedConsumer<C> {
    type Error = C::Error;

    fn handle_delivery(
        &mut self,
        consumer_tag: &str,
        envelope: &Envelope,
        props: &BasicProperties,
        body: &[u8],
    ) -> Result<(), Self::Error> {
        if !self.instrumentation.collector.is_enabled() {
            return self
                .inner
                .handle_delivery(consumer_tag, envelope, props, body);
        }
        let advice = DeliveryAdvice {
            holder: &self.instrumentation.holder,
        };
        let call = DeliveryCall {
            envelope,
            props,
            body,
        };
        intercept(&self.instrumentation.collector, &advice, &call, || {
            self.inner
                .handle_delivery(consumer_tag, envelope, props, body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use operation_collection::collector::{OperationCollector, TraceRecorder};
    use operation_collection::config::CollectorConfig;
    use operation_collection::operation::OperationMap;
    use std::sync::Arc;

    struct MockConsumer {
        deliveries: usize,
    }

    impl Consumer for MockConsumer {
        type Error = String;

        fn handle_delivery(
            &mut self,
            _consumer_tag: &str,
            _envelope: &Envelope,
            _props: &BasicProperties,
            body: &[u8],
        ) -> Result<(), String> {
            if body.is_empty() {
                return Err("empty body".to_string());
            }
            self.deliveries += 1;
            Ok(())
        }
    }

    fn create_props() -> BasicProperties {
        BasicProperties {
            app_id: Some("RabbitMQ".to_string()),
            content_encoding: Some("UTF-8".to_string()),
            content_type: Some("TEXT".to_string()),
            correlation_id: Some("None".to_string()),
            delivery_mode: Some(3),
            expiration: Some("Never".to_string()),
            message_id: Some("Message-1".to_string()),
            priority: Some(4),
            timestamp: Some(1_318_000_000),
            ..Default::default()
        }
    }

    fn setup() -> (RabbitInstrumentation, Arc<TraceRecorder>) {
        let recorder = Arc::new(TraceRecorder::new());
        let collector = Arc::new(
            OperationCollector::new(CollectorConfig::default()).with_listener(recorder.clone()),
        );
        (RabbitInstrumentation::new(collector), recorder)
    }

    #[test]
    fn test_handle_delivery() {
        let (instrumentation, recorder) = setup();
        let mut consumer = instrumentation.consumer(MockConsumer { deliveries: 0 });

        let envelope = Envelope::new(1, false, "exchange", "routingKey");
        let props = create_props();
        let body = [0u8; 25];

        assert!(instrumentation.holder().is_empty());
        consumer
            .handle_delivery("1", &envelope, &props, &body)
            .unwrap();
        assert!(instrumentation.holder().is_empty());
        assert_eq!(consumer.inner().deliveries, 1);

        assert_eq!(recorder.len(), 1);
        let trace = recorder.last().unwrap();
        assert_eq!(trace.frames().len(), 1);
        let op = trace.root().operation();
        assert_eq!(op.op_type(), OperationType::value_of("rabbitmq-client-consumer"));
        assert_eq!(op.label(), "Consume");
        assert_eq!(op.get_as::<i64>("bytes"), Ok(Some(25)));

        let env_map = op.get_as::<&OperationMap>("envelope").unwrap().unwrap();
        assert_eq!(env_map.get_as::<i64>("deliveryTag"), Ok(Some(1)));
        assert_eq!(env_map.get_as::<&str>("exchange"), Ok(Some("exchange")));
        assert_eq!(env_map.get_as::<&str>("routingKey"), Ok(Some("routingKey")));

        assert!(op.get("connectionUrl").is_none());
        assert!(op.get("serverVersion").is_none());
        assert!(op.get("clientVersion").is_none());

        let props_map = op.get_as::<&OperationMap>("props").unwrap().unwrap();
        assert_eq!(props_map.get_as::<&str>("App Id"), Ok(Some("RabbitMQ")));
        assert_eq!(props_map.get_as::<&str>("Content Encoding"), Ok(Some("UTF-8")));
        assert_eq!(props_map.get_as::<&str>("Content Type"), Ok(Some("TEXT")));
        assert_eq!(props_map.get_as::<i64>("Delivery Mode"), Ok(Some(3)));
        assert_eq!(props_map.get_as::<&str>("Expiration"), Ok(Some("Never")));
        assert!(props_map.get("User Id").is_none());
    }

    #[test]
    fn test_delivery_inside_request_nests() {
        let (instrumentation, recorder) = setup();
        let mut consumer = instrumentation.consumer(MockConsumer { deliveries: 0 });
        let collector = Arc::clone(instrumentation.collector());

        collector.enter(Operation::new(OperationType::value_of("http"), "POST /jobs"));
        consumer
            .handle_delivery("1", &Envelope::new(7, false, "jobs", "run"), &create_props(), b"go")
            .unwrap();
        assert!(instrumentation.holder().is_empty());
        assert!(recorder.is_empty());
        collector.exit_normal().unwrap();

        let trace = recorder.last().unwrap();
        assert_eq!(trace.frames().len(), 2);
        assert_eq!(trace.frames()[1].operation().label(), "Consume");
    }

    #[test]
    fn test_failed_delivery_is_recorded_and_returned() {
        let (instrumentation, recorder) = setup();
        let mut consumer = instrumentation.consumer(MockConsumer { deliveries: 0 });

        let result = consumer.handle_delivery(
            "1",
            &Envelope::new(2, true, "exchange", "routingKey"),
            &BasicProperties::default(),
            &[],
        );
        assert_eq!(result, Err("empty body".to_string()));
        assert!(instrumentation.holder().is_empty());

        let trace = recorder.last().unwrap();
        assert_eq!(trace.root().error(), Some("empty body"));
        assert_eq!(trace.root().operation().get_as::<i64>("bytes"), Ok(Some(0)));
    }

    #[test]
    fn test_disabled_collector_passes_through() {
        let recorder = Arc::new(TraceRecorder::new());
        let config = CollectorConfig {
            enabled: false,
            ..Default::default()
        };
        let collector = Arc::new(OperationCollector::new(config).with_listener(recorder.clone()));
        let instrumentation = RabbitInstrumentation::new(collector);
        let mut consumer = instrumentation.consumer(MockConsumer { deliveries: 0 });

        let envelope = Envelope::new(3, false, "exchange", "routingKey");
        consumer
            .handle_delivery("1", &envelope, &create_props(), b"payload")
            .unwrap();
        assert_eq!(
            consumer.handle_delivery("1", &envelope, &create_props(), &[]),
            Err("empty body".to_string())
        );
        assert_eq!(consumer.inner().deliveries, 1);
        assert!(recorder.is_empty());
        assert!(instrumentation.holder().is_empty());
    }
}
