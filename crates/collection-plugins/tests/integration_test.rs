// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use collection_plugins::mongodb::{self, DbCursor, InstrumentedCursor};
use collection_plugins::rabbitmq::{
    self, BasicProperties, Channel, ConnectionInfo, Consumer, Envelope, GetResponse,
    RabbitInstrumentation,
};
use operation_collection::{
    collector::{OperationCollector, TraceRecorder},
    config::CollectorConfig,
    metrics::MetricsAggregatorService,
    operation::{Document, Operation, OperationType},
    resource::ResourceKey,
    trace::{ManualClock, ENDPOINT_FIELD},
};
use serde_json::json;
use std::sync::Arc;

struct Broker {
    connection: ConnectionInfo,
    queue: Vec<GetResponse>,
}

impl Channel for Broker {
    type Error = String;

    fn connection(&self) -> Option<&ConnectionInfo> {
        Some(&self.connection)
    }

    fn basic_get(&mut self, _queue: &str, _auto_ack: bool) -> Result<Option<GetResponse>, String> {
        Ok(self.queue.pop())
    }

    fn basic_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        props: &BasicProperties,
        body: &[u8],
    ) -> Result<(), String> {
        self.queue.push(GetResponse {
            envelope: Envelope::new(self.queue.len() as u64 + 1, false, exchange, routing_key),
            props: props.clone(),
            body: body.to_vec(),
            message_count: 0,
        });
        Ok(())
    }
}

struct Worker {
    handled: Vec<u64>,
}

impl Consumer for Worker {
    type Error = String;

    fn handle_delivery(
        &mut self,
        _consumer_tag: &str,
        envelope: &Envelope,
        _props: &BasicProperties,
        _body: &[u8],
    ) -> Result<(), String> {
        self.handled.push(envelope.delivery_tag);
        Ok(())
    }
}

struct Orders {
    query: Document,
    rows: Vec<Document>,
}

impl DbCursor for Orders {
    type Error = String;

    fn collection_name(&self) -> &str {
        "orders"
    }

    fn query(&self) -> &Document {
        &self.query
    }

    fn keys_wanted(&self) -> &Document {
        &self.query
    }

    fn next(&mut self) -> Result<Option<Document>, String> {
        Ok(self.rows.pop())
    }

    fn skip(&mut self, _n: i32) -> Result<(), String> {
        Ok(())
    }

    fn limit(&mut self, _n: i32) -> Result<(), String> {
        Ok(())
    }

    fn batch_size(&mut self, _n: i32) -> Result<(), String> {
        Ok(())
    }

    fn sort(&mut self, _order_by: &Document) -> Result<(), String> {
        Ok(())
    }

    fn to_array(&mut self) -> Result<Vec<Document>, String> {
        Ok(std::mem::take(&mut self.rows))
    }

    fn to_array_max(&mut self, max: usize) -> Result<Vec<Document>, String> {
        let keep = self.rows.len().saturating_sub(max);
        Ok(self.rows.split_off(keep))
    }

    fn count(&mut self) -> Result<u64, String> {
        Ok(self.rows.len() as u64)
    }
}

fn broker() -> Broker {
    Broker {
        connection: ConnectionInfo {
            host: "localhost".to_string(),
            port: 5672,
            server_version: None,
            client_version: Some("5.4.3".to_string()),
        },
        queue: Vec::new(),
    }
}

fn request(endpoint: &str) -> Operation {
    let mut op = Operation::new(OperationType::value_of("http"), format!("POST {endpoint}"));
    op.put(ENDPOINT_FIELD, endpoint).unwrap();
    op
}

#[tokio::test]
async fn rabbit_traffic_feeds_aggregator() {
    let config = CollectorConfig::default();
    let (service, handle) = MetricsAggregatorService::new(&config);
    let service_task = tokio::spawn(service.run());

    let recorder = Arc::new(TraceRecorder::new());
    let mut collector = OperationCollector::new(config)
        .with_clock(Arc::new(ManualClock::new(100 * 1_000_000_000, 1_000)))
        .with_listener(recorder.clone())
        .with_metrics_sink(Arc::new(handle.clone()));
    for generator in rabbitmq::metrics_generators() {
        collector = collector.with_generator(generator);
    }
    let instrumentation = RabbitInstrumentation::new(Arc::new(collector));
    let collector = Arc::clone(instrumentation.collector());

    let mut channel = instrumentation.channel(broker());
    collector.enter(request("orders"));
    channel
        .basic_publish("orders", "created", &BasicProperties::default(), b"{\"id\":1}")
        .unwrap();
    channel
        .basic_publish("orders", "created", &BasicProperties::default(), b"{\"id\":2}")
        .unwrap();
    collector.exit_normal().unwrap();

    // deliveries arrive outside any request and form traces of their own
    let mut consumer = instrumentation.consumer(Worker { handled: Vec::new() });
    for response in channel.into_inner().queue {
        consumer
            .handle_delivery("ctag", &response.envelope, &response.props, &response.body)
            .unwrap();
    }
    assert_eq!(consumer.inner().handled, vec![1, 2]);
    assert!(instrumentation.holder().is_empty());
    assert_eq!(recorder.len(), 3);

    let bags = handle.flush().await.expect("Failed to flush");
    let publisher_key = "rabbitmq-client-publisher:type=counter";
    let consumer_key = "rabbitmq-client-consumer:type=counter";

    let endpoint = bags
        .iter()
        .find(|b| b.resource_key() == &ResourceKey::endpoint("orders"))
        .expect("endpoint bag");
    assert_eq!(endpoint.counter(publisher_key), Some(2));

    let destination = ResourceKey::external("rabbitmq-client-publisher:exchange=orders:routingKey=created");
    let published = bags
        .iter()
        .find(|b| b.resource_key() == &destination)
        .expect("publish destination bag");
    assert_eq!(published.counter(publisher_key), Some(2));

    let consumed = bags
        .iter()
        .find(|b| {
            b.resource_key()
                == &ResourceKey::external("rabbitmq-client-consumer:exchange=orders:routingKey=created")
        })
        .expect("consume destination bag");
    assert_eq!(consumed.counter(consumer_key), Some(2));

    handle.shutdown().expect("Failed to shutdown");
    service_task.await.expect("Service task failed");
}

#[test]
fn mongo_calls_nest_under_request() {
    let recorder = Arc::new(TraceRecorder::new());
    let collector = Arc::new(
        OperationCollector::new(CollectorConfig::default()).with_listener(recorder.clone()),
    );
    let mut cursor = InstrumentedCursor::new(
        Orders {
            query: Document::new(),
            rows: vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]
                .into_iter()
                .filter_map(|v| v.as_object().cloned())
                .collect(),
        },
        Arc::clone(&collector),
    );

    collector.enter(request("reports"));
    assert_eq!(cursor.count().unwrap(), 3);
    assert_eq!(cursor.to_array_max(2).unwrap().len(), 2);
    assert!(cursor.next().unwrap().is_some());
    collector.exit_normal().unwrap();

    let trace = recorder.last().unwrap();
    assert_eq!(trace.resource_key(), &ResourceKey::endpoint("reports"));
    let labels: Vec<&str> = trace
        .last_frames_of_type(mongodb::operation_type())
        .iter()
        .map(|f| f.operation().label())
        .collect();
    assert_eq!(
        labels,
        vec![
            "MongoDB: DBCursor.count()",
            "MongoDB: DBCursor.toArray()",
            "MongoDB: DBCursor.next()"
        ]
    );
}
