//! Progress reporting
//!
//! The fetch loops call an observer at page boundaries instead of logging
//! inline, so the engine does not depend on any particular sink.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FullSnapshot,
    Updates,
    Baseline,
    Artifacts,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::FullSnapshot => "acs",
            Phase::Updates => "updates",
            Phase::Baseline => "baseline",
            Phase::Artifacts => "artifacts",
        }
    }
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, phase: Phase, pages_done: u64, events_done: u64);
}

/// Logs every `every_pages` pages at info level, the rest at debug
pub struct LogProgress {
    every_pages: u64,
}

impl LogProgress {
    pub fn new(every_pages: u64) -> Self {
        Self {
            every_pages: every_pages.max(1),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ProgressObserver for LogProgress {
    fn on_progress(&self, phase: Phase, pages_done: u64, events_done: u64) {
        if pages_done % self.every_pages == 0 {
            log::info!(
                "📊 [{}] {} pages, {} events",
                phase.as_str(),
                pages_done,
                events_done
            );
        } else {
            log::debug!(
                "[{}] {} pages, {} events",
                phase.as_str(),
                pages_done,
                events_done
            );
        }
    }
}

/// Keeps the latest counters; used by tests and status endpoints
#[derive(Debug, Default)]
pub struct CountingProgress {
    pub calls: AtomicU64,
    pub last_pages: AtomicU64,
    pub last_events: AtomicU64,
}

impl ProgressObserver for CountingProgress {
    fn on_progress(&self, _phase: Phase, pages_done: u64, events_done: u64) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.last_pages.store(pages_done, Ordering::Relaxed);
        self.last_events.store(events_done, Ordering::Relaxed);
    }
}
