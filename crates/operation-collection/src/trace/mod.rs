// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Completed call trees.
//!
//! A [`Trace`] is the read-only frame tree of one logical unit of work. It is
//! produced by the collector when the outermost frame of a context closes and
//! handed to every listener and metrics generator interested in it.
//!
//! # Layout
//!
//! Frames are stored in one vector in the order they were entered, so the
//! root is always at index 0 and every parent precedes its children. Parent
//! and child links are [`FrameId`] indices into that vector.

pub(crate) mod builder;
mod frame;
mod range;

pub use frame::{Frame, FrameId};
pub use range::{Clock, ManualClock, SystemClock, TimeRange};

use crate::operation::{Operation, OperationType};
use crate::resource::ResourceKey;
use serde::Serialize;
use std::fmt;

/// Field a root operation may carry to name its endpoint explicitly.
pub const ENDPOINT_FIELD: &str = "endpoint";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TraceId(pub u64);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    id: TraceId,
    resource_key: ResourceKey,
    range: TimeRange,
    frames: Vec<Frame>,
    dropped_frames: usize,
    #[serde(skip)]
    operation_types: Vec<OperationType>,
}

impl Trace {
    /// `frames` must be non-empty with the root at index 0.
    pub(crate) fn from_frames(id: TraceId, frames: Vec<Frame>, dropped_frames: usize) -> Self {
        let root = &frames[0];
        let resource_key = endpoint_key(root.operation());
        let range = frames
            .iter()
            .fold(root.range(), |range, frame| range.union(&frame.range()));

        let mut operation_types: Vec<OperationType> = Vec::new();
        for frame in &frames {
            let op_type = frame.operation().op_type();
            if !operation_types.contains(&op_type) {
                operation_types.push(op_type);
            }
        }

        Self {
            id,
            resource_key,
            range,
            frames,
            dropped_frames,
            operation_types,
        }
    }

    /// A trace made of a single frame, for operations emitted outside any
    /// context stack.
    pub(crate) fn single(
        id: TraceId,
        mut operation: Operation,
        range: TimeRange,
        error: Option<String>,
    ) -> Self {
        operation.finalize_construction();
        let mut frame = Frame::open(FrameId(0), None, operation, range.start());
        frame.close(range.end(), error);
        Self::from_frames(id, vec![frame], 0)
    }

    pub fn id(&self) -> TraceId {
        self.id
    }

    /// Key of the endpoint this trace is attributed to.
    pub fn resource_key(&self) -> &ResourceKey {
        &self.resource_key
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    pub fn root(&self) -> &Frame {
        &self.frames[0]
    }

    pub fn frame(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(id.0)
    }

    /// All frames in the order they were entered.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn children<'a>(&'a self, frame: &'a Frame) -> impl Iterator<Item = &'a Frame> + 'a {
        frame.children().iter().map(move |id| &self.frames[id.0])
    }

    pub fn parent(&self, frame: &Frame) -> Option<&Frame> {
        frame.parent().map(|id| &self.frames[id.0])
    }

    /// Number of enters discarded because the trace hit its frame limit.
    pub fn dropped_frames(&self) -> usize {
        self.dropped_frames
    }

    /// Distinct operation types present, in first-seen order.
    pub fn operation_types(&self) -> &[OperationType] {
        &self.operation_types
    }

    pub fn contains_type(&self, op_type: OperationType) -> bool {
        self.operation_types.contains(&op_type)
    }

    pub fn frames_of_type(&self, op_type: OperationType) -> Vec<&Frame> {
        self.frames
            .iter()
            .filter(|frame| frame.operation().op_type() == op_type)
            .collect()
    }

    /// For every leaf-to-root path, the frame of `op_type` closest to the
    /// leaf. A frame is returned once even if it is the innermost match of
    /// several paths; sibling matches are each returned on their own.
    pub fn last_frames_of_type(&self, op_type: OperationType) -> Vec<&Frame> {
        if !self.contains_type(op_type) {
            return Vec::new();
        }

        // uncovered[i]: some leaf under frame i reaches i without passing a
        // frame of `op_type` (frame i itself included).
        let mut uncovered = vec![false; self.frames.len()];
        let mut selected = vec![false; self.frames.len()];
        for (index, frame) in self.frames.iter().enumerate().rev() {
            let below = frame.children().is_empty()
                || frame.children().iter().any(|child| uncovered[child.0]);
            let matches = frame.operation().op_type() == op_type;
            selected[index] = matches && below;
            uncovered[index] = below && !matches;
        }

        self.frames
            .iter()
            .zip(selected)
            .filter_map(|(frame, selected)| selected.then_some(frame))
            .collect()
    }
}

fn endpoint_key(root: &Operation) -> ResourceKey {
    match root.get(ENDPOINT_FIELD).and_then(|value| value.as_str()) {
        Some(endpoint) => ResourceKey::endpoint(endpoint),
        None => ResourceKey::endpoint(root.label()),
    }
}
