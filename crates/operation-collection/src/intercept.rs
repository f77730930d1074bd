// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Before/after/on-error advice applied around an intercepted call.
//!
//! Deciding *where* to intercept is left to the caller: an adapter wraps the
//! library method it instruments and routes the call through [`intercept`],
//! providing a [`CollectionAdvice`] that knows how to describe the call.
//!
//! [`intercept`] guarantees that:
//! - the call's own result is returned untouched, whatever the advice does;
//! - advice failures, panics included, are logged, and the partially filled
//!   operation is still recorded;
//! - the frame opened for the call is closed on every path, including a
//!   panic unwinding through it;
//! - advice may call back into the collector.

use crate::collector::{OperationCollector, OperationHolder};
use crate::errors::InstrumentationError;
use crate::operation::{Operation, OperationType};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

const PANICKED: &str = "intercepted call panicked";

/// Describes one intercepted call shape.
///
/// `Call` is whatever the adapter captured at entry (usually the receiver
/// plus the arguments), `Output` the successful return value.
pub trait CollectionAdvice<Call: ?Sized, Output> {
    fn operation_type(&self) -> OperationType;

    fn label(&self, call: &Call) -> String;

    /// Records entry-time fields.
    fn fill(&self, _call: &Call, _operation: &mut Operation) -> Result<(), InstrumentationError> {
        Ok(())
    }

    /// Records fields derived from the return value.
    fn on_return(
        &self,
        _call: &Call,
        _output: &Output,
        _operation: &mut Operation,
    ) -> Result<(), InstrumentationError> {
        Ok(())
    }

    /// Records fields derived from the call's error.
    fn on_error(
        &self,
        _call: &Call,
        _error: &dyn fmt::Display,
        _operation: &mut Operation,
    ) -> Result<(), InstrumentationError> {
        Ok(())
    }

    /// Holder for calls happening outside any traced context. When set and
    /// the current thread has no open frame, the operation is recorded as a
    /// standalone trace instead of opening a context of its own.
    fn untraced_holder(&self) -> Option<&OperationHolder> {
        None
    }
}

/// Runs `proceed` under `advice`, recording one operation for the call.
pub fn intercept<C, T, E, A, F>(
    collector: &OperationCollector,
    advice: &A,
    call: &C,
    proceed: F,
) -> Result<T, E>
where
    C: ?Sized,
    A: CollectionAdvice<C, T> + ?Sized,
    E: fmt::Display,
    F: FnOnce() -> Result<T, E>,
{
    if !collector.is_enabled() {
        return proceed();
    }

    let op_type = advice.operation_type();
    let label = match guarded(|| Ok(advice.label(call))) {
        Ok(label) => label,
        Err(e) => {
            report(Err(e), op_type);
            op_type.to_string()
        }
    };
    let mut operation = Operation::new(op_type, label);
    report(guarded(|| advice.fill(call, &mut operation)), op_type);

    if let Some(holder) = advice.untraced_holder() {
        if !collector.has_active_frame() {
            let held = holder.hold(collector, operation);
            let result = proceed();
            match &result {
                Ok(output) => {
                    held.update(|operation| {
                        report(guarded(|| advice.on_return(call, output, operation)), op_type)
                    });
                    held.release();
                }
                Err(error) => {
                    held.update(|operation| {
                        report(guarded(|| advice.on_error(call, error, operation)), op_type)
                    });
                    held.release_with_error(error);
                }
            }
            return result;
        }
    }

    collector.enter(operation);
    let guard = ExitGuard {
        collector,
        armed: true,
    };
    let result = proceed();

    match &result {
        Ok(output) => {
            collector.update_current(|operation| {
                report(guarded(|| advice.on_return(call, output, operation)), op_type)
            });
            guard.close(None);
        }
        Err(error) => {
            collector.update_current(|operation| {
                report(guarded(|| advice.on_error(call, error, operation)), op_type)
            });
            guard.close(Some(error));
        }
    }
    result
}

/// Runs advice code, turning a panic into an [`InstrumentationError`].
fn guarded<R>(
    advice: impl FnOnce() -> Result<R, InstrumentationError>,
) -> Result<R, InstrumentationError> {
    catch_unwind(AssertUnwindSafe(advice))
        .unwrap_or_else(|panic| Err(InstrumentationError::Panicked(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown cause".to_string()
    }
}

fn report(result: Result<(), InstrumentationError>, op_type: OperationType) {
    if let Err(e) = result {
        warn!(
            "Instrumentation of {} failed, recording partial operation: {}",
            op_type, e
        );
    }
}

/// Closes the intercepted call's frame, also when `proceed` unwinds.
struct ExitGuard<'a> {
    collector: &'a OperationCollector,
    armed: bool,
}

impl ExitGuard<'_> {
    fn close(mut self, error: Option<&dyn fmt::Display>) {
        self.armed = false;
        exit_frame(self.collector, error);
    }
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            exit_frame(self.collector, Some(&PANICKED));
        }
    }
}

/// A listener or sink panicking on the completed trace stays out of the
/// intercepted call; unmatched exits are logged by the collector.
fn exit_frame(collector: &OperationCollector, error: Option<&dyn fmt::Display>) {
    let outcome = catch_unwind(AssertUnwindSafe(|| match error {
        Some(error) => collector.exit_with_exception(error),
        None => collector.exit_normal(),
    }));
    if let Err(panic) = outcome {
        warn!("Trace dispatch panicked: {}", panic_message(panic.as_ref()));
    }
}
