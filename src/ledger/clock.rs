//! Wall-clock abstraction for sideband timestamps. Injected rather than
//! called directly (`std::time::SystemTime::now()`), so that the
//! determinism property of `spec.md` §8 ("replaying the same block
//! sequence... yields identical ledger state byte-for-byte, ignoring
//! timestamps... which are inputs") can be tested with a fixed clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }
}

/// A clock that returns a fixed, manually-advanceable value; used by tests
/// that need byte-identical replay across runs.
pub struct FixedClock {
    value: AtomicU64,
}

impl FixedClock {
    pub fn new(initial: u64) -> Self {
        FixedClock { value: AtomicU64::new(initial) }
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_unix(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}
