// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stack-disciplined construction of a trace's frame tree.

use crate::errors::CorrelationError;
use crate::operation::Operation;
use crate::trace::frame::{Frame, FrameId};
use crate::trace::{Trace, TraceId};

#[derive(Debug, Clone, Copy)]
enum OpenFrame {
    Recorded(FrameId),
    /// Entered past the frame limit. Kept on the stack so exits still pair up.
    Dropped,
}

/// Open frames of one execution context plus the frames closed so far.
///
/// Timestamps are clamped so that a child starts no earlier than its parent
/// and a parent ends no earlier than its last child, whatever the clock says.
#[derive(Debug)]
pub(crate) struct TraceBuilder {
    id: TraceId,
    frames: Vec<Frame>,
    open: Vec<OpenFrame>,
    max_frames: usize,
    dropped: usize,
}

impl TraceBuilder {
    pub(crate) fn new(id: TraceId, max_frames: usize) -> Self {
        Self {
            id,
            frames: Vec::new(),
            open: Vec::new(),
            max_frames: max_frames.max(1),
            dropped: 0,
        }
    }

    /// Opens a frame under the current one. Returns `false` when the frame
    /// limit was hit and the operation was discarded.
    pub(crate) fn enter(&mut self, operation: Operation, now: u64) -> bool {
        if self.frames.len() >= self.max_frames {
            self.open.push(OpenFrame::Dropped);
            self.dropped += 1;
            return false;
        }

        let id = FrameId(self.frames.len());
        let parent = self.current_recorded();
        let start = match parent {
            Some(parent) => now.max(self.frames[parent.0].range().start()),
            None => now,
        };
        if let Some(parent) = parent {
            self.frames[parent.0].add_child(id);
        }
        self.frames.push(Frame::open(id, parent, operation, start));
        self.open.push(OpenFrame::Recorded(id));
        true
    }

    /// Closes the most recently opened frame.
    pub(crate) fn exit(&mut self, now: u64, error: Option<String>) -> Result<(), CorrelationError> {
        let Some(open) = self.open.pop() else {
            return Err(CorrelationError::StackUnderflow);
        };
        if let OpenFrame::Recorded(id) = open {
            let children_end = self.frames[id.0]
                .children()
                .iter()
                .map(|child| self.frames[child.0].range().end())
                .max()
                .unwrap_or(0);
            self.frames[id.0].close(now.max(children_end), error);
        }
        Ok(())
    }

    pub(crate) fn depth(&self) -> usize {
        self.open.len()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.open.is_empty()
    }

    pub(crate) fn current_operation_mut(&mut self) -> Option<&mut Operation> {
        let id = self.current_open()?;
        self.frames.get_mut(id.0).map(Frame::operation_mut)
    }

    /// Detaches the current frame's operation, leaving one with the same
    /// type and label in its place until [`restore_operation`] puts it back.
    ///
    /// [`restore_operation`]: TraceBuilder::restore_operation
    pub(crate) fn take_current_operation(&mut self) -> Option<(FrameId, Operation)> {
        let id = self.current_open()?;
        let slot = self.current_operation_mut()?;
        let stand_in = Operation::new(slot.op_type(), slot.label().to_string());
        Some((id, std::mem::replace(slot, stand_in)))
    }

    /// Puts back an operation detached from frame `id`. Hands it back when
    /// that frame is no longer the current one.
    pub(crate) fn restore_operation(
        &mut self,
        id: FrameId,
        operation: Operation,
    ) -> Result<(), Operation> {
        if self.current_open() != Some(id) {
            return Err(operation);
        }
        match self.current_operation_mut() {
            Some(slot) => {
                *slot = operation;
                Ok(())
            }
            None => Err(operation),
        }
    }

    /// Finishes the trace. Returns `None` if nothing was recorded.
    pub(crate) fn build(self) -> Option<Trace> {
        if self.frames.is_empty() {
            return None;
        }
        Some(Trace::from_frames(self.id, self.frames, self.dropped))
    }

    fn current_open(&self) -> Option<FrameId> {
        match self.open.last()? {
            OpenFrame::Recorded(id) => Some(*id),
            OpenFrame::Dropped => None,
        }
    }

    fn current_recorded(&self) -> Option<FrameId> {
        self.open.iter().rev().find_map(|open| match open {
            OpenFrame::Recorded(id) => Some(*id),
            OpenFrame::Dropped => None,
        })
    }
}
