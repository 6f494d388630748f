//! # Wait/Wake Primitive
//!
//! The host-supplied suspension primitive behind contended mutex requests.
//! The protocol in [`crate::futex`] only ever sleeps on the contended state,
//! so a single wait word is enough.

use core::sync::atomic::{AtomicU32, Ordering};

/// Park/unpark on a 32-bit word, in the style of a futex.
///
/// `wait` may return spuriously; callers always re-check the word.
pub trait WaitWake: Send + Sync {
    /// Block the caller while `*word == expected`.
    fn wait(&self, word: &AtomicU32, expected: u32);

    /// Wake one waiter parked on `word`.
    fn wake_one(&self, word: &AtomicU32);
}

/// A wait/wake implementation that spins instead of sleeping.
///
/// Suitable for hosts without a parking primitive and for tests; wake-ups
/// are implicit in the word changing value.
pub struct SpinWait;

impl WaitWake for SpinWait {
    fn wait(&self, word: &AtomicU32, expected: u32) {
        while word.load(Ordering::Acquire) == expected {
            core::hint::spin_loop();
        }
    }

    fn wake_one(&self, _word: &AtomicU32) {}
}
