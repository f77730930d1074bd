// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entry point adapters push captured operations into.
//!
//! An [`OperationCollector`] keeps one open-frame stack per thread. Adapters
//! receive the collector explicitly (usually as an `Arc`) instead of reaching
//! for a process-wide singleton, and several collectors may coexist: each
//! thread-local stack is keyed by the collector's id.
//!
//! When the outermost frame of a thread closes, the trace is handed to every
//! [`TraceListener`], then every [`MetricsGenerator`] whose operation type
//! appears in it runs and the resulting bags go to the [`MetricsSink`].
//! Dispatch happens after the thread-local state is released, so listeners
//! and sinks may capture operations themselves.

mod holder;

pub use holder::{HeldOperation, OperationHolder};

use crate::config::CollectorConfig;
use crate::errors::CorrelationError;
use crate::metrics::{MetricsBag, MetricsGenerator, MetricsSink};
use crate::operation::Operation;
use crate::trace::builder::TraceBuilder;
use crate::trace::{Clock, SystemClock, TimeRange, Trace, TraceId};
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

const ABANDONED_FRAME: &str = "frame abandoned at context end";

static NEXT_COLLECTOR_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CONTEXTS: RefCell<HashMap<u64, TraceBuilder>> = RefCell::new(HashMap::new());
}

/// Receives every completed trace.
pub trait TraceListener: Send + Sync {
    fn on_trace(&self, trace: &Arc<Trace>);
}

/// Listener keeping completed traces in memory.
#[derive(Debug, Default)]
pub struct TraceRecorder {
    traces: Mutex<Vec<Arc<Trace>>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<Arc<Trace>> {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<Arc<Trace>> {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl TraceListener for TraceRecorder {
    fn on_trace(&self, trace: &Arc<Trace>) {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(trace));
    }
}

pub struct OperationCollector {
    id: u64,
    config: CollectorConfig,
    clock: Arc<dyn Clock>,
    generators: Vec<Arc<dyn MetricsGenerator>>,
    listeners: Vec<Arc<dyn TraceListener>>,
    sink: Option<Arc<dyn MetricsSink>>,
    next_trace_id: AtomicU64,
}

impl OperationCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            id: NEXT_COLLECTOR_ID.fetch_add(1, Ordering::Relaxed),
            config,
            clock: Arc::new(SystemClock::new()),
            generators: Vec::new(),
            listeners: Vec::new(),
            sink: None,
            next_trace_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn MetricsGenerator>) -> Self {
        self.generators.push(generator);
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn TraceListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    #[must_use]
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Opens a frame for `operation` under the current thread's open frame,
    /// starting a new trace if there is none.
    pub fn enter(&self, operation: Operation) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now();
        let recorded = CONTEXTS.with(|contexts| {
            let mut contexts = contexts.borrow_mut();
            let builder = contexts.entry(self.id).or_insert_with(|| {
                TraceBuilder::new(self.next_trace_id(), self.config.max_frames_per_trace)
            });
            builder.enter(operation, now)
        });
        if !recorded {
            debug!(
                "Frame limit of {} reached, dropping operation",
                self.config.max_frames_per_trace
            );
        }
    }

    pub fn exit_normal(&self) -> Result<(), CorrelationError> {
        self.exit(None)
    }

    /// Closes the current frame, recording `error` on it.
    pub fn exit_with_exception(&self, error: &dyn fmt::Display) -> Result<(), CorrelationError> {
        self.exit(Some(error.to_string()))
    }

    /// Whether the current thread has an open frame in this collector.
    pub fn has_active_frame(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        CONTEXTS.with(|contexts| {
            contexts
                .borrow()
                .get(&self.id)
                .is_some_and(|builder| !builder.is_complete())
        })
    }

    /// Applies `f` to the operation of the current frame. Returns `None` when
    /// there is no open frame, or when it was dropped by the frame limit.
    ///
    /// The operation is detached while `f` runs, so `f` may call back into
    /// the collector. Fields written after the frame closed underneath `f`
    /// are discarded.
    pub fn update_current<R>(&self, f: impl FnOnce(&mut Operation) -> R) -> Option<R> {
        if !self.config.enabled {
            return None;
        }
        let (id, mut operation) = CONTEXTS.with(|contexts| {
            contexts
                .borrow_mut()
                .get_mut(&self.id)
                .and_then(TraceBuilder::take_current_operation)
        })?;

        let result = f(&mut operation);

        let restored = CONTEXTS.with(|contexts| {
            match contexts.borrow_mut().get_mut(&self.id) {
                Some(builder) => builder.restore_operation(id, operation).is_ok(),
                None => false,
            }
        });
        if !restored {
            debug!("Current frame closed during update, fields discarded");
        }
        Some(result)
    }

    /// Closes every frame still open on the current thread and dispatches
    /// the trace. Returns the number of frames that had to be closed.
    pub fn end_context(&self) -> usize {
        let Some(mut builder) =
            CONTEXTS.with(|contexts| contexts.borrow_mut().remove(&self.id))
        else {
            return 0;
        };

        let abandoned = builder.depth();
        let now = self.clock.now();
        while builder.exit(now, Some(ABANDONED_FRAME.to_string())).is_ok() {}
        if abandoned > 0 {
            warn!("Closed {} frames left open at context end", abandoned);
        }
        if let Some(trace) = builder.build() {
            self.dispatch(trace);
        }
        abandoned
    }

    /// Records `operation` as a trace of its own, without touching the
    /// current thread's stack.
    pub fn emit(&self, operation: Operation) {
        let now = self.clock.now();
        self.emit_range(operation, TimeRange::instant(now), None);
    }

    pub(crate) fn emit_range(&self, operation: Operation, range: TimeRange, error: Option<String>) {
        if !self.config.enabled {
            return;
        }
        let trace = Trace::single(self.next_trace_id(), operation, range, error);
        self.dispatch(trace);
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Bags every interested generator produces for `trace`.
    pub fn generate_metrics(&self, trace: &Trace) -> Vec<MetricsBag> {
        self.generators
            .iter()
            .filter(|generator| trace.contains_type(generator.operation_type()))
            .flat_map(|generator| generator.generate(trace))
            .collect()
    }

    fn exit(&self, error: Option<String>) -> Result<(), CorrelationError> {
        if !self.config.enabled {
            return Ok(());
        }
        let now = self.clock.now();
        let completed = CONTEXTS.with(|contexts| -> Result<Option<Trace>, CorrelationError> {
            let mut contexts = contexts.borrow_mut();
            let builder = contexts
                .get_mut(&self.id)
                .ok_or(CorrelationError::StackUnderflow)?;
            builder.exit(now, error)?;
            if builder.is_complete() {
                Ok(contexts.remove(&self.id).and_then(TraceBuilder::build))
            } else {
                Ok(None)
            }
        });

        match completed {
            Ok(Some(trace)) => {
                self.dispatch(trace);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!("Unmatched exit: {}", e);
                Err(e)
            }
        }
    }

    fn dispatch(&self, trace: Trace) {
        let trace = Arc::new(trace);
        debug!(
            "Trace {} completed for {} with {} frames",
            trace.id(),
            trace.resource_key(),
            trace.frames().len()
        );

        for listener in &self.listeners {
            listener.on_trace(&trace);
        }

        if let Some(sink) = &self.sink {
            let bags = self.generate_metrics(&trace);
            if !bags.is_empty() {
                sink.submit(bags);
            }
        }
    }

    fn next_trace_id(&self) -> TraceId {
        TraceId(self.next_trace_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Frames still open on the dropping thread are discarded without
/// dispatch. Other threads must call [`OperationCollector::end_context`]
/// before the collector goes away, or their entries outlive it until the
/// thread exits.
impl Drop for OperationCollector {
    fn drop(&mut self) {
        let discarded = CONTEXTS
            .try_with(|contexts| {
                contexts
                    .try_borrow_mut()
                    .ok()
                    .and_then(|mut contexts| contexts.remove(&self.id))
                    .map_or(0, |builder| builder.depth())
            })
            .unwrap_or(0);
        if discarded > 0 {
            debug!("Collector dropped with {} open frames", discarded);
        }
    }
}

#[cfg(test)]
fn has_context(id: u64) -> bool {
    CONTEXTS.with(|contexts| contexts.borrow().contains_key(&id))
}

impl fmt::Debug for OperationCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationCollector")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("generators", &self.generators.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
