//! Counting admission gate for parallel batches.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Caps how many parallel batches hold a connection at once.
///
/// A [`GatePermit`] returns its slot when dropped, so a batch frees its slot
/// on every exit path, including failure and cancellation.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take a slot if one is free.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(GatePermit {
                        in_flight: Arc::clone(&self.in_flight),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.in_flight())
    }
}

/// One admitted slot; released on drop.
#[derive(Debug)]
pub struct GatePermit {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
