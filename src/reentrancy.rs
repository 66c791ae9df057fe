//! Debug-only reentrancy guard for the concurrent set.
//!
//! User hash and equality callbacks run while a bucket lock is held. If such a
//! callback calls back into the same set on the same thread it would deadlock
//! on that lock. In debug builds every guarded entry point records the set it
//! entered in a thread-local list and panics on nested entry instead. In
//! release builds this compiles to a zero-cost no-op.

use core::marker::PhantomData;

#[cfg(debug_assertions)]
use std::cell::RefCell;
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(debug_assertions)]
static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

#[cfg(debug_assertions)]
thread_local! {
    static ENTERED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Identity of one set in the thread-local entered list. Every
/// lock-taking method of the concurrent set holds `self.reentrancy.enter()`
/// for its duration.
#[derive(Debug)]
pub(crate) struct DebugReentrancy {
    #[cfg(debug_assertions)]
    id: usize,
}

impl DebugReentrancy {
    pub(crate) fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Marks this set as entered by the calling thread until the guard drops.
    /// Debug builds panic if the thread has already entered it.
    #[inline]
    pub(crate) fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            ENTERED.with(|entered| {
                let mut entered = entered.borrow_mut();
                assert!(
                    !entered.contains(&self.id),
                    "reentrancy detected: hash or equality callback re-entered the set"
                );
                entered.push(self.id);
            });
            return ReentrancyGuard {
                owner: self,
                _lt: PhantomData,
            };
        }

        #[cfg(not(debug_assertions))]
        {
            return ReentrancyGuard { _lt: PhantomData };
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the set from the entered list on drop.
pub(crate) struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    _lt: PhantomData<&'a ()>,
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let id = self.owner.id;
            ENTERED.with(|entered| {
                let mut entered = entered.borrow_mut();
                if let Some(pos) = entered.iter().rposition(|&e| e == id) {
                    entered.swap_remove(pos);
                }
            });
        }
    }
}
