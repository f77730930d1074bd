// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Operations captured outside any traced context.
//!
//! A delivery callback running on a client library's own thread has no outer
//! frame to nest under. The adapter parks the operation in an
//! [`OperationHolder`] while the call runs, fills it from the result, then
//! releases it as a standalone trace. The holder is empty again once every
//! [`HeldOperation`] is gone, whichever way the call ended.

use crate::collector::OperationCollector;
use crate::operation::Operation;
use crate::trace::TimeRange;
use hashbrown::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const UNRELEASED: &str = "operation dropped before release";

#[derive(Debug)]
struct Held {
    operation: Operation,
    start: u64,
}

/// Pending operations of one adapter, keyed by hold id.
#[derive(Debug, Default)]
pub struct OperationHolder {
    held: Mutex<HashMap<u64, Held>>,
    next_id: AtomicU64,
}

impl OperationHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold<'a>(
        &'a self,
        collector: &'a OperationCollector,
        operation: Operation,
    ) -> HeldOperation<'a> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let start = collector.now();
        self.lock().insert(id, Held { operation, start });
        HeldOperation {
            holder: self,
            collector,
            id,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn take(&self, id: u64) -> Option<Held> {
        self.lock().remove(&id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Held>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Guard over one parked operation. Dropping it without
/// [`release`](HeldOperation::release) still emits the operation, marked
/// with an error.
#[must_use = "a held operation is emitted when released or dropped"]
pub struct HeldOperation<'a> {
    holder: &'a OperationHolder,
    collector: &'a OperationCollector,
    id: u64,
}

impl HeldOperation<'_> {
    /// Runs `f` on the parked operation. The holder is unlocked while `f`
    /// runs, so `f` may use the holder itself.
    pub fn update<R>(&self, f: impl FnOnce(&mut Operation) -> R) -> Option<R> {
        let mut held = self.holder.take(self.id)?;
        let result = f(&mut held.operation);
        self.holder.lock().insert(self.id, held);
        Some(result)
    }

    pub fn release(self) {
        self.finish(None);
    }

    pub fn release_with_error(self, error: &dyn fmt::Display) {
        self.finish(Some(error.to_string()));
    }

    fn finish(&self, error: Option<String>) {
        let Some(held) = self.holder.take(self.id) else {
            return;
        };
        let end = self.collector.now();
        debug!("Releasing held operation '{}'", held.operation.label());
        self.collector
            .emit_range(held.operation, TimeRange::new(held.start, end), error);
    }
}

impl Drop for HeldOperation<'_> {
    fn drop(&mut self) {
        self.finish(Some(UNRELEASED.to_string()));
    }
}
