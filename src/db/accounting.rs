//! Connection usage accounting.
//!
//! Two monotonic counters: connections requested and connections returned.
//! Their difference is the number of connections currently out. Tests and
//! diagnostics take a [`UsageMark`] before a unit of work and verify after it
//! that everything borrowed in between came back.

use crate::error::{PoolError, PoolResult};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

#[derive(Debug, Default)]
pub struct UsageAccountant {
    requested: AtomicU64,
    returned: AtomicU64,
}

/// Counter values captured at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageMark {
    pub requested: u64,
    pub returned: u64,
}

impl UsageMark {
    /// Connections out at the time of the mark.
    pub fn outstanding(&self) -> u64 {
        self.requested.saturating_sub(self.returned)
    }
}

impl UsageAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_borrow(&self) {
        self.requested.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_return(&self) {
        let returned = self.returned.fetch_add(1, Ordering::AcqRel) + 1;
        let requested = self.requested.load(Ordering::Acquire);
        if returned > requested {
            warn!(
                requested = requested,
                returned = returned,
                "More connections returned than requested"
            );
        }
    }

    /// Total connections ever requested. Never decreases.
    pub fn total_requested_count(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    /// Total connections ever returned. Never decreases.
    pub fn total_returned_count(&self) -> u64 {
        self.returned.load(Ordering::Acquire)
    }

    /// Connections currently borrowed and not yet returned.
    pub fn outstanding_count(&self) -> u64 {
        self.mark().outstanding()
    }

    /// Capture the current counter values.
    pub fn mark(&self) -> UsageMark {
        // Read `returned` first so a concurrent borrow+return pair can't make
        // returned exceed requested in the snapshot.
        let returned = self.returned.load(Ordering::Acquire);
        let requested = self.requested.load(Ordering::Acquire);
        UsageMark {
            requested,
            returned,
        }
    }

    /// Check that every connection requested since `since` was returned.
    pub fn verify_balanced(&self, since: &UsageMark) -> PoolResult<()> {
        let now = self.mark();
        let borrowed = now.requested.saturating_sub(since.requested);
        let returned = now.returned.saturating_sub(since.returned);
        if borrowed != returned {
            warn!(
                borrowed = borrowed,
                returned = returned,
                "Connection accounting mismatch"
            );
            return Err(PoolError::leak_detected(borrowed, returned));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_accountant_is_zero() {
        let acc = UsageAccountant::new();
        assert_eq!(acc.total_requested_count(), 0);
        assert_eq!(acc.total_returned_count(), 0);
        assert_eq!(acc.outstanding_count(), 0);
    }

    #[test]
    fn test_outstanding_tracks_net_borrows() {
        let acc = UsageAccountant::new();
        let mark = acc.mark();
        acc.record_borrow();
        acc.record_borrow();
        acc.record_return();
        assert_eq!(acc.outstanding_count() - mark.outstanding(), 1);
        assert_eq!(acc.total_requested_count(), 2);
    }

    #[test]
    fn test_requested_count_is_monotonic() {
        let acc = UsageAccountant::new();
        acc.record_borrow();
        let before = acc.total_requested_count();
        acc.record_return();
        assert_eq!(acc.total_requested_count(), before);
    }

    #[test]
    fn test_verify_balanced_ok() {
        let acc = UsageAccountant::new();
        acc.record_borrow();
        let mark = acc.mark();
        acc.record_borrow();
        acc.record_return();
        assert!(acc.verify_balanced(&mark).is_ok());
    }

    #[test]
    fn test_verify_balanced_detects_leak() {
        let acc = UsageAccountant::new();
        let mark = acc.mark();
        acc.record_borrow();
        acc.record_borrow();
        acc.record_return();
        let err = acc.verify_balanced(&mark).unwrap_err();
        assert!(matches!(
            err,
            PoolError::LeakDetected {
                borrowed: 2,
                returned: 1
            }
        ));
    }

    #[test]
    fn test_concurrent_balanced_use() {
        let acc = Arc::new(UsageAccountant::new());
        let mark = acc.mark();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let acc = Arc::clone(&acc);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        acc.record_borrow();
                        acc.record_return();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(acc.verify_balanced(&mark).is_ok());
        assert_eq!(acc.total_requested_count(), 1600);
    }
}
