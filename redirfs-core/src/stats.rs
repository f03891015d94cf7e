//! Counters of routed operations.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Types of routed operations that are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// A backend-bound file was opened.
    Open,
    /// A read served by the backend read verb.
    BackendRead,
    /// A read served through the passthrough descriptor.
    PassthroughRead,
    Write,
    /// A backend verb answered "try again".
    Retry,
    /// The last alias of a record was closed and the backend handle released.
    Release,
    OpenDir,
    Stat,
    Rename,
}

impl OperationType {
    pub const ALL: [OperationType; 9] = [
        OperationType::Open,
        OperationType::BackendRead,
        OperationType::PassthroughRead,
        OperationType::Write,
        OperationType::Retry,
        OperationType::Release,
        OperationType::OpenDir,
        OperationType::Stat,
        OperationType::Rename,
    ];

    /// Returns a human-readable name for the operation type.
    pub fn name(&self) -> &'static str {
        match self {
            OperationType::Open => "open",
            OperationType::BackendRead => "backend_read",
            OperationType::PassthroughRead => "passthrough_read",
            OperationType::Write => "write",
            OperationType::Retry => "retry",
            OperationType::Release => "release",
            OperationType::OpenDir => "opendir",
            OperationType::Stat => "stat",
            OperationType::Rename => "rename",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Process-wide statistics of the dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    counts: [AtomicU64; OperationType::ALL.len()],

    /// Total bytes read from backend-bound files
    pub bytes_read: AtomicU64,

    /// Total bytes written to backend-bound files
    pub bytes_written: AtomicU64,
}

impl DispatchStats {
    /// Creates a new instance with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the count for a specific operation type.
    pub fn record(&self, op: OperationType) {
        self.counts[op.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, op: OperationType, bytes: usize) {
        self.record(op);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize) {
        self.record(OperationType::Write);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Gets the count for a specific operation type.
    pub fn count(&self, op: OperationType) -> u64 {
        self.counts[op.index()].load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all operation counts.
    pub fn snapshot(&self) -> HashMap<OperationType, u64> {
        OperationType::ALL
            .iter()
            .map(|op| (*op, self.count(*op)))
            .collect()
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        for counter in &self.counts {
            counter.store(0, Ordering::Relaxed);
        }
        self.bytes_read.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
    }
}
