// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Field layout shared by consume and publish operations.

use crate::rabbitmq::{BasicProperties, ConnectionInfo, Envelope};
use operation_collection::errors::InstrumentationError;
use operation_collection::operation::{Operation, OperationMap, Value};

pub(crate) const BYTES: &str = "bytes";
pub(crate) const ENVELOPE: &str = "envelope";
pub(crate) const EXCHANGE: &str = "exchange";
pub(crate) const ROUTING_KEY: &str = "routingKey";
const DELIVERY_TAG: &str = "deliveryTag";
const PROPS: &str = "props";

pub(crate) fn record_delivery(
    operation: &mut Operation,
    envelope: &Envelope,
    props: &BasicProperties,
    body: &[u8],
) -> Result<(), InstrumentationError> {
    operation.put(BYTES, body.len())?;
    operation
        .create_map(ENVELOPE)?
        .put(DELIVERY_TAG, envelope.delivery_tag)
        .put(EXCHANGE, envelope.exchange.as_str())
        .put(ROUTING_KEY, envelope.routing_key.as_str());
    record_props(operation, props)
}

pub(crate) fn record_publish(
    operation: &mut Operation,
    exchange: &str,
    routing_key: &str,
    props: &BasicProperties,
    body: &[u8],
) -> Result<(), InstrumentationError> {
    operation.put(BYTES, body.len())?;
    operation
        .create_map(ENVELOPE)?
        .put(EXCHANGE, exchange)
        .put(ROUTING_KEY, routing_key);
    record_props(operation, props)
}

/// Connection fields are left out entirely when the channel has none.
pub(crate) fn record_connection(
    operation: &mut Operation,
    connection: Option<&ConnectionInfo>,
) -> Result<(), InstrumentationError> {
    let Some(connection) = connection else {
        return Ok(());
    };
    operation
        .put("connectionUrl", connection.url())?
        .put_any_non_empty("serverVersion", connection.server_version.as_deref())?
        .put_any_non_empty("clientVersion", connection.client_version.as_deref())?;
    Ok(())
}

fn record_props(operation: &mut Operation, props: &BasicProperties) -> Result<(), InstrumentationError> {
    let map = operation.create_map(PROPS)?;
    put_present(map, "App Id", props.app_id.as_deref());
    put_present(map, "Content Encoding", props.content_encoding.as_deref());
    put_present(map, "Content Type", props.content_type.as_deref());
    put_present(map, "Correlation Id", props.correlation_id.as_deref());
    put_present(map, "Delivery Mode", props.delivery_mode);
    put_present(map, "Expiration", props.expiration.as_deref());
    put_present(map, "Message Id", props.message_id.as_deref());
    put_present(map, "Priority", props.priority);
    put_present(map, "Reply To", props.reply_to.as_deref());
    put_present(map, "Timestamp", props.timestamp);
    put_present(map, "User Id", props.user_id.as_deref());
    Ok(())
}

fn put_present<V: Into<Value>>(map: &mut OperationMap, name: &str, value: Option<V>) {
    if let Some(value) = value {
        map.put(name, value);
    }
}
