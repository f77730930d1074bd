// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Time ranges and the clocks that produce them.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Closed interval of nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeRange {
    start: u64,
    end: u64,
}

impl TimeRange {
    /// Builds a range, swapping the bounds if they are reversed.
    pub fn new(start: u64, end: u64) -> Self {
        if end < start {
            Self {
                start: end,
                end: start,
            }
        } else {
            Self { start, end }
        }
    }

    pub fn instant(at: u64) -> Self {
        Self { start: at, end: at }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.end - self.start)
    }

    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn union(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Start of the `window_secs` bucket the range starts in, in seconds.
    pub fn window_start_secs(&self, window_secs: u64) -> u64 {
        let secs = self.start / NANOS_PER_SEC;
        let window = window_secs.max(1);
        secs - secs % window
    }
}

/// Source of frame timestamps, in nanoseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Monotonic clock anchored to the wall clock at creation.
#[derive(Debug)]
pub struct SystemClock {
    anchor: Instant,
    anchor_epoch_nanos: u64,
}

impl SystemClock {
    pub fn new() -> Self {
        let anchor_epoch_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self {
            anchor: Instant::now(),
            anchor_epoch_nanos,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        let elapsed = u64::try_from(self.anchor.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.anchor_epoch_nanos.saturating_add(elapsed)
    }
}

/// Deterministic clock: every reading advances time by a fixed step.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
    step: u64,
}

impl ManualClock {
    pub fn new(start: u64, step: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
            step,
        }
    }

    pub fn set(&self, at: u64) {
        self.now.store(at, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }
}
