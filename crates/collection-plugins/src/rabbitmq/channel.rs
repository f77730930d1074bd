// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::rabbitmq::fields::{record_connection, record_delivery, record_publish};
use crate::rabbitmq::{
    BasicProperties, Channel, ConnectionInfo, GetResponse, RabbitInstrumentation,
    RabbitPluginOperationType,
};
use operation_collection::collector::OperationHolder;
use operation_collection::errors::InstrumentationError;
use operation_collection::intercept::{intercept, CollectionAdvice};
use operation_collection::operation::{Operation, OperationType};

struct GetCall {
    connection: Option<ConnectionInfo>,
}

/// `basic_get` only knows the message once the call returns.
struct GetAdvice<'a> {
    holder: &'a OperationHolder,
}

impl CollectionAdvice<GetCall, Option<GetResponse>> for GetAdvice<'_> {
    fn operation_type(&self) -> OperationType {
        RabbitPluginOperationType::Consume.operation_type()
    }

    fn label(&self, _call: &GetCall) -> String {
        RabbitPluginOperationType::Consume.label().to_string()
    }

    fn fill(&self, call: &GetCall, operation: &mut Operation) -> Result<(), InstrumentationError> {
        record_connection(operation, call.connection.as_ref())
    }

    fn on_return(
        &self,
        _call: &GetCall,
        output: &Option<GetResponse>,
        operation: &mut Operation,
    ) -> Result<(), InstrumentationError> {
        match output {
            Some(response) => record_delivery(
                operation,
                &response.envelope,
                &response.props,
                &response.body,
            ),
            // queue was empty
            None => Ok(()),
        }
    }

    fn untraced_holder(&self) -> Option<&OperationHolder> {
        Some(self.holder)
    }
}

struct PublishCall<'a> {
    exchange: &'a str,
    routing_key: &'a str,
    props: &'a BasicProperties,
    body: &'a [u8],
    connection: Option<ConnectionInfo>,
}

struct PublishAdvice;

impl CollectionAdvice<PublishCall<'_>, ()> for PublishAdvice {
    fn operation_type(&self) -> OperationType {
        RabbitPluginOperationType::Publish.operation_type()
    }

    fn label(&self, _call: &PublishCall<'_>) -> String {
        RabbitPluginOperationType::Publish.label().to_string()
    }

    fn fill(
        &self,
        call: &PublishCall<'_>,
        operation: &mut Operation,
    ) -> Result<(), InstrumentationError> {
        record_publish(
            operation,
            call.exchange,
            call.routing_key,
            call.props,
            call.body,
        )?;
        record_connection(operation, call.connection.as_ref())
    }
}

/// A [`Channel`] recording gets as consume operations and publishes as
/// publish operations.
pub struct InstrumentedChannel<C> {
    inner: C,
    instrumentation: RabbitInstrumentation,
}

impl<C: Channel> InstrumentedChannel<C> {
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

impl<C: Channel> Channel for InstrumentedChannel<C> {
    type Error = C::Error;

    fn connection(&self) -> Option<&ConnectionInfo> {
        self.inner.connection()
    }

    fn basic_get(
        &mut self,
        queue: &str,
        auto_ack: bool,
    ) -> Result<Option<GetResponse>, Self::Error> {
        if !self.instrumentation.collector.is_enabled() {
            return self.inner.basic_get(queue, auto_ack);
        }
        let advice = GetAdvice {
            holder: &self.instrumentation.holder,
        };
        let call = GetCall {
            connection: self.inner.connection().cloned(),
        };
        intercept(&self.instrumentation.collector, &advice, &call, || {
            self.inner.basic_get(queue, auto_ack)
        })
    }

    fn basic_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        props: &BasicProperties,
        body: &[u8],
    ) -> Result<(), Self::Error> {
        if !self.instrumentation.collector.is_enabled() {
            return self.inner.basic_publish(exchange, routing_key, props, body);
        }
        let call = PublishCall {
            exchange,
            routing_key,
            props,
            body,
            connection: self.inner.connection().cloned(),
        };
        intercept(&self.instrumentation.collector, &PublishAdvice, &call, || {
            self.inner.basic_publish(exchange, routing_key, props, body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rabbitmq::Envelope;
    use operation_collection::collector::{OperationCollector, TraceRecorder};
    use operation_collection::config::CollectorConfig;
    use operation_collection::operation::OperationMap;
    use std::sync::Arc;

    struct MockChannel {
        response: Option<GetResponse>,
        connection: Option<ConnectionInfo>,
        published: Vec<(String, String, usize)>,
    }

    impl MockChannel {
        fn new(response: Option<GetResponse>) -> Self {
            Self {
                response,
                connection: None,
                published: Vec::new(),
            }
        }
    }

    impl Channel for MockChannel {
        type Error = String;

        fn connection(&self) -> Option<&ConnectionInfo> {
            self.connection.as_ref()
        }

        fn basic_get(
            &mut self,
            _queue: &str,
            _auto_ack: bool,
        ) -> Result<Option<GetResponse>, String> {
            Ok(self.response.clone())
        }

        fn basic_publish(
            &mut self,
            exchange: &str,
            routing_key: &str,
            _props: &BasicProperties,
            body: &[u8],
        ) -> Result<(), String> {
            if exchange == "missing" {
                return Err("NOT_FOUND - no exchange 'missing'".to_string());
            }
            self.published
                .push((exchange.to_string(), routing_key.to_string(), body.len()));
            Ok(())
        }
    }

    fn response() -> GetResponse {
        GetResponse {
            envelope: Envelope::new(1, false, "exchange", "routingKey"),
            props: BasicProperties {
                app_id: Some("RabbitMQ".to_string()),
                content_type: Some("TEXT".to_string()),
                delivery_mode: Some(3),
                ..Default::default()
            },
            body: vec![0; 25],
            message_count: 0,
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
    fn test_basic_get() {
        let (instrumentation, recorder) = setup();
        let mut channel = instrumentation.channel(MockChannel::new(Some(response())));

        assert!(instrumentation.holder().is_empty());
        let got = channel.basic_get("rk", false).unwrap();
        assert!(instrumentation.holder().is_empty());
        assert_eq!(got, Some(response()));

        assert_eq!(recorder.len(), 1);
        let op = recorder.last().unwrap().root().operation().clone();
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
        assert_eq!(props_map.get_as::<i64>("Delivery Mode"), Ok(Some(3)));
    }

    #[test]
    fn test_basic_get_on_empty_queue() {
        let (instrumentation, recorder) = setup();
        let mut channel = instrumentation.channel(MockChannel::new(None));

        assert_eq!(channel.basic_get("rk", true), Ok(None));
        assert!(instrumentation.holder().is_empty());
        let op = recorder.last().unwrap().root().operation().clone();
        assert_eq!(op.label(), "Consume");
        assert!(op.get("bytes").is_none());
        assert!(op.get("envelope").is_none());
    }

    #[test]
    fn test_basic_publish_with_connection() {
        let (instrumentation, recorder) = setup();
        let mut inner = MockChannel::new(None);
        inner.connection = Some(ConnectionInfo {
            host: "broker.local".to_string(),
            port: 5672,
            server_version: Some("3.8.9".to_string()),
            client_version: None,
        });
        let mut channel = instrumentation.channel(inner);

        channel
            .basic_publish("orders", "created", &BasicProperties::default(), b"{}")
            .unwrap();
        assert_eq!(
            channel.inner().published,
            vec![("orders".to_string(), "created".to_string(), 2)]
        );

        let op = recorder.last().unwrap().root().operation().clone();
        assert_eq!(op.op_type(), OperationType::value_of("rabbitmq-client-publisher"));
        assert_eq!(op.label(), "Publish");
        assert_eq!(op.get_as::<i64>("bytes"), Ok(Some(2)));
        assert_eq!(
            op.get_as::<&str>("connectionUrl"),
            Ok(Some("amqp://broker.local:5672"))
        );
        assert_eq!(op.get_as::<&str>("serverVersion"), Ok(Some("3.8.9")));
        assert!(op.get("clientVersion").is_none());

        let env_map = op.get_as::<&OperationMap>("envelope").unwrap().unwrap();
        assert_eq!(env_map.get_as::<&str>("exchange"), Ok(Some("orders")));
        assert_eq!(env_map.get_as::<&str>("routingKey"), Ok(Some("created")));
        assert!(env_map.get("deliveryTag").is_none());
    }

    #[test]
    fn test_publish_failure_passes_through() {
        let (instrumentation, recorder) = setup();
        let mut channel = instrumentation.channel(MockChannel::new(None));

        let result = channel.basic_publish("missing", "rk", &BasicProperties::default(), b"x");
        assert_eq!(result, Err("NOT_FOUND - no exchange 'missing'".to_string()));
        assert_eq!(
            recorder.last().unwrap().root().error(),
            Some("NOT_FOUND - no exchange 'missing'")
        );
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
        let mut channel = instrumentation.channel(MockChannel::new(Some(response())));

        assert_eq!(channel.basic_get("rk", false), Ok(Some(response())));
        channel
            .basic_publish("orders", "created", &BasicProperties::default(), b"{}")
            .unwrap();
        assert_eq!(channel.inner().published.len(), 1);
        assert!(recorder.is_empty());
        assert!(instrumentation.holder().is_empty());
    }
}
