//! # ChronOS Synchronization Primitives
//!
//! The two low-level building blocks the scheduling core rests on:
//!
//! - An MCS queue lock: FIFO-fair, with each contending CPU spinning on its
//!   own cache line. Serializes stop-the-world scheduling decisions.
//! - The three-state (free / held / contended) futex protocol behind
//!   scheduler-managed mutexes, parameterized over the host's wait/wake
//!   primitive.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod futex;
pub mod mcs;
pub mod wait;

pub use futex::{FutexValue, FUTEX_CONTENDED, FUTEX_FREE, FUTEX_HELD};
pub use mcs::{McsLock, McsNode};
pub use wait::{SpinWait, WaitWake};
