//! One-shot I/O fault injection for store operations.
//!
//! Tests arm a fault at a [`FaultPoint`]; the next store operation reaching
//! that point fails with `StoreUnavailable` and the fault disarms itself.

use crate::core::{DbError, Result};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::debug;

/// Store operation where a fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    Begin,
    Read,
    Write,
    Commit,
    /// Inside a journal append, after part of the frame reached the file
    JournalWrite,
}

impl FaultPoint {
    const ALL: [FaultPoint; 5] = [
        FaultPoint::Begin,
        FaultPoint::Read,
        FaultPoint::Write,
        FaultPoint::Commit,
        FaultPoint::JournalWrite,
    ];

    fn index(self) -> usize {
        match self {
            FaultPoint::Begin => 0,
            FaultPoint::Read => 1,
            FaultPoint::Write => 2,
            FaultPoint::Commit => 3,
            FaultPoint::JournalWrite => 4,
        }
    }

    fn label(self) -> &'static str {
        match self {
            FaultPoint::Begin => "begin",
            FaultPoint::Read => "read",
            FaultPoint::Write => "write",
            FaultPoint::Commit => "commit",
            FaultPoint::JournalWrite => "journal write",
        }
    }
}

#[derive(Debug, Default)]
pub struct FaultInjector {
    armed: [AtomicU32; 5],
    triggered: AtomicU64,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next operation reaching `point`.
    pub fn fail_next(&self, point: FaultPoint) {
        self.fail_times(point, 1);
    }

    /// Fail the next `times` operations reaching `point`.
    pub fn fail_times(&self, point: FaultPoint, times: u32) {
        self.armed[point.index()].fetch_add(times, Ordering::SeqCst);
    }

    /// Disarm everything.
    pub fn clear(&self) {
        for point in FaultPoint::ALL {
            self.armed[point.index()].store(0, Ordering::SeqCst);
        }
    }

    /// Total faults fired so far
    pub fn triggered(&self) -> u64 {
        self.triggered.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self, point: FaultPoint) -> Result<()> {
        let slot = &self.armed[point.index()];
        let fired = slot
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fired {
            self.triggered.fetch_add(1, Ordering::SeqCst);
            debug!(point = point.label(), "injected store fault");
            return Err(DbError::StoreUnavailable(format!(
                "injected I/O failure at {}",
                point.label()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_fires_once() {
        let faults = FaultInjector::new();
        faults.fail_next(FaultPoint::Read);

        assert!(faults.check(FaultPoint::Write).is_ok());
        let err = faults.check(FaultPoint::Read).unwrap_err();
        assert!(err.to_string().contains("read"));
        assert!(faults.check(FaultPoint::Read).is_ok());
        assert_eq!(faults.triggered(), 1);
    }

    #[test]
    fn test_clear_disarms() {
        let faults = FaultInjector::new();
        faults.fail_times(FaultPoint::Commit, 3);
        faults.clear();
        assert!(faults.check(FaultPoint::Commit).is_ok());
        assert_eq!(faults.triggered(), 0);
    }
}
