//! Shared progress structure coordinating the copy and replay tasks, plus
//! the process-wide cancel flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative cancellation. Workers check it between chunks and batches
/// and at every throttle wake.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress shared between the copier and the replayer.
#[derive(Debug, Default)]
pub struct CopyProgress {
    pub chunks: AtomicU64,
    pub rows: AtomicU64,
    copy_done: AtomicBool,
}

impl CopyProgress {
    pub fn record_chunk(&self, rows: u64) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.rows.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn mark_copy_done(&self) {
        self.copy_done.store(true, Ordering::SeqCst);
    }

    pub fn copy_done(&self) -> bool {
        self.copy_done.load(Ordering::SeqCst)
    }
}

/// Server thread ids of the sessions a run has open. A cancellation
/// handler kills these from a side session so blocked statements abort
/// promptly instead of waiting out their own completion.
#[derive(Debug, Clone, Default)]
pub struct ThreadRegistry(Arc<std::sync::Mutex<Vec<u32>>>);

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, thread_id: u32) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(thread_id);
    }

    pub fn thread_ids(&self) -> Vec<u32> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Wall-clock accounting reported at the end of a successful run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub time_in_dump: Duration,
    pub time_in_load: Duration,
    pub time_in_replay: Duration,
    pub time_in_lock: Duration,
    pub rows_copied: u64,
    pub changes_replayed: u64,
}

impl RunStats {
    pub fn merge(&mut self, other: &RunStats) {
        self.time_in_dump += other.time_in_dump;
        self.time_in_load += other.time_in_load;
        self.time_in_replay += other.time_in_replay;
        self.time_in_lock += other.time_in_lock;
        self.rows_copied += other.rows_copied;
        self.changes_replayed += other.changes_replayed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared_across_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn progress_accumulates() {
        let p = CopyProgress::default();
        p.record_chunk(500);
        p.record_chunk(123);
        assert_eq!(p.chunks.load(Ordering::Relaxed), 2);
        assert_eq!(p.rows.load(Ordering::Relaxed), 623);
        assert!(!p.copy_done());
        p.mark_copy_done();
        assert!(p.copy_done());
    }
}
