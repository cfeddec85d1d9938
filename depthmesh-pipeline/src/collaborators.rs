//! Contracts for the services the processor reports to and depends on
//!
//! None of these are implemented by the engine itself, apart from
//! [`PerformanceBudget`], a reference monitor enforcing fixed time and
//! memory limits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use depthmesh_core::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the processor reports after each major step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceSample {
    pub operation: String,
    /// Time since the start of the `process` call
    pub elapsed: Duration,
    /// Highest buffer reservation seen during the call
    pub peak_memory_bytes: u64,
}

/// Budget breach raised by a [`PerformanceMonitor`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BudgetViolation {
    #[error("processing exceeded time limit: {elapsed:?} > {limit:?}")]
    TimeExceeded { elapsed: Duration, limit: Duration },

    #[error("memory usage exceeded limit: {used} bytes > {limit} bytes")]
    MemoryExceeded { used: u64, limit: u64 },
}

/// Receives performance samples and decides whether the budget holds
pub trait PerformanceMonitor: Send + Sync {
    fn report(&self, sample: &PerformanceSample) -> std::result::Result<(), BudgetViolation>;
}

/// Monitor enforcing fixed time and memory ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceBudget {
    pub max_elapsed: Duration,
    pub max_memory_bytes: u64,
}

impl Default for PerformanceBudget {
    fn default() -> Self {
        Self {
            max_elapsed: Duration::from_secs(5),
            max_memory_bytes: 200 * 1024 * 1024,
        }
    }
}

impl PerformanceBudget {
    pub fn with_max_elapsed(mut self, limit: Duration) -> Self {
        self.max_elapsed = limit;
        self
    }

    pub fn with_max_memory_bytes(mut self, limit: u64) -> Self {
        self.max_memory_bytes = limit;
        self
    }
}

impl PerformanceMonitor for PerformanceBudget {
    fn report(&self, sample: &PerformanceSample) -> std::result::Result<(), BudgetViolation> {
        if sample.elapsed > self.max_elapsed {
            return Err(BudgetViolation::TimeExceeded {
                elapsed: sample.elapsed,
                limit: self.max_elapsed,
            });
        }
        if sample.peak_memory_bytes > self.max_memory_bytes {
            return Err(BudgetViolation::MemoryExceeded {
                used: sample.peak_memory_bytes,
                limit: self.max_memory_bytes,
            });
        }
        Ok(())
    }
}

/// Shared expiration flag for one unit of background work
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Handle for a task started with a [`BackgroundTaskManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

/// Host service that keeps long-running work alive.
///
/// The manager signals expiration by cancelling the token it was given.
pub trait BackgroundTaskManager: Send + Sync {
    fn begin(&self, name: &str, token: CancellationToken) -> TaskId;
    fn end(&self, id: TaskId);
}

/// Codec used to stage oversized inputs
pub trait CompressionService: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Restore `data`, which decodes to `expected_len` bytes
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>>;
}

/// Ends a background task when dropped
pub(crate) struct TaskGuard<'a> {
    manager: Option<&'a dyn BackgroundTaskManager>,
    id: Option<TaskId>,
}

impl<'a> TaskGuard<'a> {
    pub(crate) fn begin(
        manager: Option<&'a dyn BackgroundTaskManager>,
        name: &str,
        token: &CancellationToken,
    ) -> Self {
        let id = manager.map(|m| m.begin(name, token.clone()));
        Self { manager, id }
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        if let (Some(manager), Some(id)) = (self.manager, self.id.take()) {
            manager.end(id);
        }
    }
}
