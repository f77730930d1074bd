// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! RabbitMQ client operations.
//!
//! Two operation types are recorded: `rabbitmq-client-consumer` for message
//! deliveries (`Consumer::handle_delivery`, `Channel::basic_get`) and
//! `rabbitmq-client-publisher` for `Channel::basic_publish`.
//!
//! Deliveries usually arrive on the client library's own threads, outside any
//! traced request. A consume call with no open frame on its thread is parked
//! in the [`RabbitInstrumentation`]'s holder while it runs and then recorded
//! as a trace of its own; inside a traced request it nests like any other
//! call.

mod channel;
mod consumer;
mod fields;
mod metrics;

pub use channel::InstrumentedChannel;
pub use consumer::InstrumentedConsumer;
pub use metrics::RabbitMetricsGenerator;

use operation_collection::collector::{OperationCollector, OperationHolder};
use operation_collection::metrics::MetricsGenerator;
use operation_collection::operation::OperationType;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RabbitPluginOperationType {
    Publish,
    Consume,
}

impl RabbitPluginOperationType {
    pub const ALL: [RabbitPluginOperationType; 2] = [Self::Publish, Self::Consume];

    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::Publish => OperationType::value_of("rabbitmq-client-publisher"),
            Self::Consume => OperationType::value_of("rabbitmq-client-consumer"),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Publish => "Publish",
            Self::Consume => "Consume",
        }
    }
}

/// Routing information of a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub delivery_tag: u64,
    pub redeliver: bool,
    pub exchange: String,
    pub routing_key: String,
}

impl Envelope {
    pub fn new(
        delivery_tag: u64,
        redeliver: bool,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            delivery_tag,
            redeliver,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicProperties {
    pub app_id: Option<String>,
    pub content_encoding: Option<String>,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub delivery_mode: Option<u8>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub priority: Option<u8>,
    pub reply_to: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: Option<u64>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponse {
    pub envelope: Envelope,
    pub props: BasicProperties,
    pub body: Vec<u8>,
    pub message_count: u32,
}

/// Broker connection a channel belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub server_version: Option<String>,
    pub client_version: Option<String>,
}

impl ConnectionInfo {
    pub fn url(&self) -> String {
        format!("amqp://{}:{}", self.host, self.port)
    }
}

/// Receiver of pushed deliveries.
pub trait Consumer {
    type Error: fmt::Display;

    fn handle_delivery(
        &mut self,
        consumer_tag: &str,
        envelope: &Envelope,
        props: &BasicProperties,
        body: &[u8],
    ) -> Result<(), Self::Error>;
}

pub trait Channel {
    type Error: fmt::Display;

    /// The connection this channel runs on, when the client exposes it.
    fn connection(&self) -> Option<&ConnectionInfo>;

    fn basic_get(&mut self, queue: &str, auto_ack: bool)
        -> Result<Option<GetResponse>, Self::Error>;

    fn basic_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        props: &BasicProperties,
        body: &[u8],
    ) -> Result<(), Self::Error>;
}

/// Shared state of the RabbitMQ adapters: the collector they record into and
/// the holder for consume calls made outside any traced context.
#[derive(Debug, Clone)]
pub struct RabbitInstrumentation {
    collector: Arc<OperationCollector>,
    holder: Arc<OperationHolder>,
}

impl RabbitInstrumentation {
    pub fn new(collector: Arc<OperationCollector>) -> Self {
        Self {
            collector,
            holder: Arc::new(OperationHolder::new()),
        }
    }

    pub fn consumer<C: Consumer>(&self, inner: C) -> InstrumentedConsumer<C> {
        InstrumentedConsumer::new(inner, self.clone())
    }

    pub fn channel<C: Channel>(&self, inner: C) -> InstrumentedChannel<C> {
        InstrumentedChannel::new(inner, self.clone())
    }

    pub fn collector(&self) -> &Arc<OperationCollector> {
        &self.collector
    }

    /// Consume operations currently parked outside a traced context.
    pub fn holder(&self) -> &OperationHolder {
        &self.holder
    }
}

/// One counter generator per RabbitMQ operation type.
pub fn metrics_generators() -> Vec<Arc<dyn MetricsGenerator>> {
    RabbitPluginOperationType::ALL
        .into_iter()
        .map(|op| Arc::new(RabbitMetricsGenerator::new(op)) as Arc<dyn MetricsGenerator>)
        .collect()
}
