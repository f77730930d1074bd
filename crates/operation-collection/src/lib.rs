// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Operation capture core for instrumentation plugins.
//!
//! Interception adapters turn an intercepted call into an [`operation::Operation`]
//! and hand it to the [`collector::OperationCollector`]. The collector nests
//! operations into [`trace::Frame`]s on a per-thread stack, closes the
//! [`trace::Trace`] when the outermost frame exits, and runs every registered
//! [`metrics::MetricsGenerator`] over it.
//!
//! ```text
//! call -> adapter -> collector.enter(op) -> ... -> collector.exit_normal()
//!                                                       |
//!                                        Trace -> MetricsGenerator -> MetricsBag
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod collector;
pub mod config;
pub mod errors;
pub mod intercept;
pub mod logger;
pub mod metrics;
pub mod operation;
pub mod resource;
pub mod trace;
