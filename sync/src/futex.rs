//! # Three-State Mutex Protocol
//!
//! The owner-tracking futex protocol used by scheduler-managed mutexes.
//! The value word moves through three states:
//!
//! - `0` free
//! - `1` held, no waiters
//! - `2` held, at least one waiter
//!
//! Acquisition loops on compare-exchange and parks through the host's
//! [`WaitWake`] whenever the word is contended; release wakes exactly one
//! waiter, since the scheduler decides who runs next anyway.

use crate::wait::WaitWake;
use core::sync::atomic::{AtomicU32, Ordering};

/// The mutex value word.
pub type FutexValue = AtomicU32;

/// Nobody holds the mutex.
pub const FUTEX_FREE: u32 = 0;
/// Held with no waiters.
pub const FUTEX_HELD: u32 = 1;
/// Held with waiters parked.
pub const FUTEX_CONTENDED: u32 = 2;

fn cmpxchg(value: &AtomicU32, current: u32, new: u32) -> u32 {
    match value.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire) {
        Ok(prev) => prev,
        Err(prev) => prev,
    }
}

/// Acquire the mutex, parking while it is contended.
///
/// Returns `true` if the caller had to wait.
pub fn acquire<W: WaitWake + ?Sized>(value: &FutexValue, waiter: &W) -> bool {
    let mut c = cmpxchg(value, FUTEX_FREE, FUTEX_HELD);
    if c == FUTEX_FREE {
        return false;
    }
    loop {
        if c == FUTEX_CONTENDED
            || cmpxchg(value, FUTEX_HELD, FUTEX_CONTENDED) != FUTEX_HELD
        {
            waiter.wait(value, FUTEX_CONTENDED);
        }
        c = cmpxchg(value, FUTEX_FREE, FUTEX_CONTENDED);
        if c == FUTEX_FREE {
            return true;
        }
    }
}

/// Release the mutex, waking one parked waiter if the word was contended.
pub fn release<W: WaitWake + ?Sized>(value: &FutexValue, waiter: &W) {
    if cmpxchg(value, FUTEX_HELD, FUTEX_FREE) == FUTEX_CONTENDED {
        value.store(FUTEX_FREE, Ordering::Release);
        waiter.wake_one(value);
    }
}
