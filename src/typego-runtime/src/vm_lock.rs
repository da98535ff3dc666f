//! The VM Lock (spec §4.2): the single mutex serializing every entry into
//! the engine's `rquickjs::Runtime`. Ported from the Go implementation's
//! `Registry.VMLock` (`original_source/bridge/intrinsics/concurrency.go`),
//! which every intrinsic in that file acquires before touching the `goja`
//! runtime and releases exactly once per acquisition.
//!
//! Rust has no multi-goroutine scheduler to bridge, but the shape is the
//! same: every call path that reaches into the `Context` — event-loop jobs,
//! `go`-spawned threads, and direct host calls — takes this lock first.
//! `select` is the only intrinsic that releases it while guest code is
//! logically still "running" (see `intrinsics::concurrency`).

use std::cell::RefCell;
use std::sync::{Mutex, MutexGuard};

pub struct VmLock(Mutex<()>);

/// Held for the duration of one guest entry. Dropping it releases the lock;
/// there is no way to hold it past the closure passed to
/// [`VmLock::with_lock`], which keeps rule 1 ("acquire before, release
/// after") structurally true rather than merely documented.
pub struct VmLockGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

thread_local! {
    // The calling thread's currently-held guard, stashed here by
    // `with_lock` so that `release_during` (used by `intrinsics::concurrency`'s
    // `select`) can hand the lock to another thread mid-call and take it
    // back. The 'static here is a lie sustained only by the fact that every
    // `VmLock` this crate constructs lives inside a long-lived `Arc` for the
    // life of the engine, the same assumption `Persistent::transmute` calls
    // elsewhere in this crate rely on.
    static HELD_GUARD: RefCell<Option<MutexGuard<'static, ()>>> = const { RefCell::new(None) };
}

impl VmLock {
    pub fn new() -> Self {
        Self(Mutex::new(()))
    }

    /// Acquire the lock, run `f`, release it. Poisoning (a prior holder
    /// panicked while holding the lock) does not propagate a poison error
    /// outward: the lock is still usable, matching the event loop's policy
    /// that a job panic never corrupts shared state it didn't touch.
    pub fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let guard = self.lock_static();
        let previous = HELD_GUARD.with(|h| h.borrow_mut().replace(guard));
        let result = f();
        HELD_GUARD.with(|h| *h.borrow_mut() = previous);
        result
    }

    pub fn acquire(&self) -> VmLockGuard<'_> {
        let guard = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        VmLockGuard(guard)
    }

    fn lock_static(&self) -> MutexGuard<'static, ()> {
        let guard = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // SAFETY: the guard is handed back to `self` (via `HELD_GUARD`) and
        // never outlives `self`; every `VmLock` is owned by an `Arc` kept
        // alive for the engine's lifetime.
        unsafe { std::mem::transmute::<MutexGuard<'_, ()>, MutexGuard<'static, ()>>(guard) }
    }

    /// Releases the calling thread's guard (previously taken by
    /// [`VmLock::with_lock`]) for the duration of `f`, then re-acquires it.
    /// Used exclusively by `select` (spec §4.4) to let another goroutine
    /// make progress while this thread polls for a ready channel case.
    ///
    /// Panics if the calling thread is not currently holding the lock.
    pub fn release_during<R>(&self, f: impl FnOnce() -> R) -> R {
        let taken = HELD_GUARD.with(|h| h.borrow_mut().take());
        assert!(
            taken.is_some(),
            "release_during called without holding the VM lock"
        );
        drop(taken);
        let result = f();
        let guard = self.lock_static();
        HELD_GUARD.with(|h| *h.borrow_mut() = Some(guard));
        result
    }
}

impl Default for VmLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn only_one_holder_at_a_time() {
        let lock = Arc::new(VmLock::new());
        let contended = Arc::new(AtomicBool::new(false));
        let count = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                let contended = contended.clone();
                let count = count.clone();
                std::thread::spawn(move || {
                    lock.with_lock(|| {
                        if count.fetch_add(1, Ordering::SeqCst) != 0 {
                            contended.store(true, Ordering::SeqCst);
                        }
                        std::thread::sleep(std::time::Duration::from_millis(1));
                        count.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert!(!contended.load(Ordering::SeqCst));
    }
}
