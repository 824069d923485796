//! Process-wide accounting of outstanding native allocations and file mappings.
//!
//! The counters start at zero, are never reset, and are mutated only when a native
//! allocation or a mapping is acquired or released. They are intended for leak
//! detection in tests and for operational monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

struct Counter(AtomicU64);

impl Counter {
    const fn new() -> Counter {
        Counter(AtomicU64::new(0))
    }

    fn deposit(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::AcqRel);
    }

    fn withdraw(&self, amount: u64) {
        let prev = self.0.fetch_sub(amount, Ordering::AcqRel);
        debug_assert!(prev >= amount);
    }

    fn read(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

static DIRECT_ALLOCATIONS: Counter = Counter::new();
static DIRECT_ALLOCATED: Counter = Counter::new();
static MAP_ALLOCATIONS: Counter = Counter::new();
static MAP_ALLOCATED: Counter = Counter::new();

/// Number of native allocations that have been acquired and not yet released.
pub fn current_direct_allocations() -> u64 {
    DIRECT_ALLOCATIONS.read()
}

/// Total requested capacity, in bytes, of outstanding native allocations.
pub fn current_direct_allocated() -> u64 {
    DIRECT_ALLOCATED.read()
}

/// Number of file mappings that have been created and not yet unmapped.
pub fn current_map_allocations() -> u64 {
    MAP_ALLOCATIONS.read()
}

/// Total mapped capacity, in bytes, of outstanding file mappings.
pub fn current_map_allocated() -> u64 {
    MAP_ALLOCATED.read()
}

pub(crate) fn reserve_direct(capacity: u64) {
    DIRECT_ALLOCATIONS.deposit(1);
    DIRECT_ALLOCATED.deposit(capacity);
}

/// Undoes [`reserve_direct`]; used both for rollback and for release.
pub(crate) fn release_direct(capacity: u64) {
    DIRECT_ALLOCATIONS.withdraw(1);
    DIRECT_ALLOCATED.withdraw(capacity);
}

pub(crate) fn reserve_map(capacity: u64) {
    MAP_ALLOCATIONS.deposit(1);
    MAP_ALLOCATED.deposit(capacity);
}

pub(crate) fn release_map(capacity: u64) {
    MAP_ALLOCATIONS.withdraw(1);
    MAP_ALLOCATED.withdraw(capacity);
}
