// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Interception adapters built on `operation-collection`.
//!
//! Each client library is seen through a small capability trait holding only
//! the methods that get instrumented. An adapter wraps any implementation of
//! that trait, implements the same trait itself, and records one operation
//! per call through the collector it was given.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod mongodb;
pub mod rabbitmq;
