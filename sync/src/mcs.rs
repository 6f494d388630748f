//! # MCS Queue Lock
//!
//! The queue-based spinlock of Mellor-Crummey and Scott. Waiters enqueue
//! with one atomic exchange on the tail pointer and then spin on a flag in
//! their own node, so under contention each CPU touches only its own cache
//! line until its predecessor hands the lock over.
//!
//! Every locker supplies its own [`McsNode`]; the scheduling core keeps one
//! per CPU. A node must stay at a stable address and must not be reused
//! while it is enqueued.

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// Per-waiter queue node. One per CPU, cache-line sized by its owner.
pub struct McsNode {
    next: AtomicPtr<McsNode>,
    locked: AtomicBool,
}

impl McsNode {
    /// A fresh, unqueued node.
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            locked: AtomicBool::new(false),
        }
    }
}

impl Default for McsNode {
    fn default() -> Self {
        Self::new()
    }
}

/// The lock word: a pointer to the tail of the waiter queue, null when free.
pub struct McsLock {
    tail: AtomicPtr<McsNode>,
}

impl McsLock {
    /// An unlocked MCS lock.
    pub const fn new() -> Self {
        Self {
            tail: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Whether any holder or waiter is queued.
    pub fn is_locked(&self) -> bool {
        !self.tail.load(Ordering::Acquire).is_null()
    }

    /// Try to take the lock without queueing. Fails if anyone holds it.
    pub fn try_lock(&self, node: &McsNode) -> bool {
        node.next.store(ptr::null_mut(), Ordering::Relaxed);
        self.tail
            .compare_exchange(
                ptr::null_mut(),
                node as *const McsNode as *mut McsNode,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Take the lock, spinning on `node`'s local flag behind any
    /// predecessor.
    pub fn lock(&self, node: &McsNode) {
        node.next.store(ptr::null_mut(), Ordering::Relaxed);
        let pred = self.tail.swap(
            node as *const McsNode as *mut McsNode,
            Ordering::AcqRel,
        );
        if !pred.is_null() {
            node.locked.store(true, Ordering::Relaxed);
            // SAFETY: a predecessor stays valid until it hands over the
            // lock, which it cannot do before we link ourselves in.
            unsafe {
                (*pred)
                    .next
                    .store(node as *const McsNode as *mut McsNode, Ordering::Release);
            }
            while node.locked.load(Ordering::Acquire) {
                core::hint::spin_loop();
            }
        }
    }

    /// Release the lock, waking the successor if one is queued.
    pub fn unlock(&self, node: &McsNode) {
        let mut next = node.next.load(Ordering::Acquire);
        if next.is_null() {
            if self
                .tail
                .compare_exchange(
                    node as *const McsNode as *mut McsNode,
                    ptr::null_mut(),
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return;
            }
            // A successor is mid-enqueue; wait for it to link itself.
            loop {
                next = node.next.load(Ordering::Acquire);
                if !next.is_null() {
                    break;
                }
                core::hint::spin_loop();
            }
        }
        // SAFETY: the successor spins on its own node until we clear its
        // flag, so the pointer is valid here.
        unsafe {
            (*next).locked.store(false, Ordering::Release);
        }
        node.next.store(ptr::null_mut(), Ordering::Relaxed);
    }
}

impl Default for McsLock {
    fn default() -> Self {
        Self::new()
    }
}
