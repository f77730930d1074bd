// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for operation capture, correlation and metrics aggregation.
//!
//! None of these may reach the caller of an intercepted method. The collector
//! and the interception helper log them and carry on.

use crate::operation::ValueKind;
use thiserror::Error;

/// Errors raised while building or reading an [`Operation`](crate::operation::Operation).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OperationError {
    /// A field was written after `finalize_construction`.
    #[error("operation '{label}' is finalized and can no longer be modified")]
    ImmutableState { label: String },

    /// A field was read as a shape it does not hold.
    #[error("field '{field}' holds a {found} value, not a {expected}")]
    TypeMismatch {
        field: String,
        expected: ValueKind,
        found: ValueKind,
    },

    /// A nested map or list was addressed by a name that holds nothing.
    #[error("field '{0}' is not present")]
    Missing(String),
}

/// Raised when an exit signal has no matching open frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("exit called with no open frame in the current context")]
    StackUnderflow,
}

/// Adapter-side failures while populating an operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InstrumentationError {
    #[error("failed to render '{field}': {reason}")]
    Render { field: String, reason: String },

    #[error("required value '{0}' is missing from the intercepted call")]
    MissingField(String),

    #[error("advice panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Operation(#[from] OperationError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from the metrics aggregator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("metrics aggregator is full, more than {0} contexts")]
    Overflow(usize),

    #[error("metrics aggregator service is not running: {0}")]
    ServiceUnavailable(String),
}
