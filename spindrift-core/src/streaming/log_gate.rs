//! First-occurrence gating for noisy per-request error categories.
//!
//! A seeking player aborts dozens of in-flight responses per minute.
//! Each error category logs at full severity exactly once per session;
//! repeats drop to trace so the console stays readable.

use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot gate for a single error category.
pub struct LogGate {
    seen: AtomicBool,
}

impl LogGate {
    /// Creates a gate that has not fired yet.
    pub const fn new() -> Self {
        Self {
            seen: AtomicBool::new(false),
        }
    }

    /// Returns true exactly once, on the first call.
    ///
    /// Concurrent callers race on a single atomic swap, so precisely one
    /// of them observes true.
    pub fn first(&self) -> bool {
        !self.seen.swap(true, Ordering::AcqRel)
    }

    /// Whether the gate has fired.
    pub fn has_fired(&self) -> bool {
        self.seen.load(Ordering::Acquire)
    }
}

impl Default for LogGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Gates for the stream server's expected error categories.
#[derive(Default)]
pub struct LogGates {
    /// Client dropped the connection mid-body.
    pub client_abort: LogGate,
    /// A swarm read inside a response body failed.
    pub read_failure: LogGate,
}
