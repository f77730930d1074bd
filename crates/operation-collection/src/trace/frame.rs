// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::operation::Operation;
use crate::trace::range::TimeRange;
use serde::Serialize;

/// Index of a frame inside its trace. Parents always have lower ids than
/// their children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FrameId(pub(crate) usize);

impl FrameId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// One timed node of a trace's call tree.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    id: FrameId,
    parent: Option<FrameId>,
    children: Vec<FrameId>,
    operation: Operation,
    range: TimeRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Frame {
    pub(crate) fn open(
        id: FrameId,
        parent: Option<FrameId>,
        operation: Operation,
        start: u64,
    ) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            operation,
            range: TimeRange::instant(start),
            error: None,
        }
    }

    pub(crate) fn add_child(&mut self, child: FrameId) {
        self.children.push(child);
    }

    pub(crate) fn operation_mut(&mut self) -> &mut Operation {
        &mut self.operation
    }

    /// Closes the frame at `end`, never earlier than its start.
    pub(crate) fn close(&mut self, end: u64, error: Option<String>) {
        self.range = TimeRange::new(self.range.start(), end.max(self.range.start()));
        self.error = error;
        self.operation.finalize_construction();
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn parent(&self) -> Option<FrameId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn children(&self) -> &[FrameId] {
        &self.children
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    /// Text of the error the intercepted call ended with, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
