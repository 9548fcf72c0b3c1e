//! # Blocking synchronization
//!
//! [`Semaphore`] is the only primitive that suspends a thread; [`Lock`] is a
//! reentrant mutex built on a binary semaphore. Both keep their state in an
//! [`IrqCell`], so every test and update of a value happens with interrupts
//! off. Waiting threads queue on the same link table as the ready queue,
//! which is fine because a waiting thread is never ready.

use crate::Kernel;
use crate::arch::Arch;
use crate::thread::{ThreadStatus, Tid};
use kernel_collections::List;
use kernel_sync::IrqCell;

struct SemaphoreState {
    value: u32,
    waiters: List<Tid>,
}

/// Counting semaphore with a FIFO wait queue.
pub struct Semaphore {
    state: IrqCell<SemaphoreState>,
}

impl Semaphore {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self {
            state: IrqCell::new(SemaphoreState {
                value,
                waiters: List::new(),
            }),
        }
    }

    /// Take one unit, blocking while there is none.
    pub fn down<A: Arch>(&self, kernel: &Kernel<A>) {
        let irq = kernel.irq();
        loop {
            {
                let mut state = self.state.borrow(&irq);
                if state.value > 0 {
                    state.value -= 1;
                    return;
                }
                kernel.enqueue_current(&mut state.waiters, &irq);
            }
            kernel.block_current(ThreadStatus::Blocked, &irq);
        }
    }

    /// Return one unit and wake the longest waiting thread, if any.
    pub fn up<A: Arch>(&self, kernel: &Kernel<A>) {
        let irq = kernel.irq();
        let woken = {
            let mut state = self.state.borrow(&irq);
            state.value += 1;
            kernel.dequeue(&mut state.waiters, &irq)
        };
        if let Some(tid) = woken {
            kernel.thread_unblock(tid);
        }
    }

    #[must_use]
    pub fn value<A: Arch>(&self, kernel: &Kernel<A>) -> u32 {
        let irq = kernel.irq();
        self.state.borrow(&irq).value
    }

    /// Number of threads queued on the semaphore.
    #[must_use]
    pub fn waiters<A: Arch>(&self, kernel: &Kernel<A>) -> usize {
        let irq = kernel.irq();
        self.state.borrow(&irq).waiters.len()
    }
}

struct LockState {
    holder: Option<Tid>,
    depth: u32,
}

/// Reentrant lock: the holder may acquire it again, and must release it as
/// often as it acquired it.
pub struct Lock {
    state: IrqCell<LockState>,
    semaphore: Semaphore,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: IrqCell::new(LockState {
                holder: None,
                depth: 0,
            }),
            semaphore: Semaphore::new(1),
        }
    }

    pub fn acquire<A: Arch>(&self, kernel: &Kernel<A>) {
        let me = kernel.current_thread();
        {
            let irq = kernel.irq();
            let mut state = self.state.borrow(&irq);
            if state.holder == Some(me) {
                state.depth += 1;
                return;
            }
        }

        self.semaphore.down(kernel);

        let irq = kernel.irq();
        let mut state = self.state.borrow(&irq);
        assert!(state.holder.is_none(), "lock handed to {me} while held by another thread");
        state.holder = Some(me);
        state.depth = 1;
    }

    /// ### Panics
    /// If the running thread does not hold the lock.
    pub fn release<A: Arch>(&self, kernel: &Kernel<A>) {
        let me = kernel.current_thread();
        {
            let irq = kernel.irq();
            let mut state = self.state.borrow(&irq);
            assert!(
                state.holder == Some(me),
                "{me} releases a lock it does not hold (holder: {:?})",
                state.holder
            );
            if state.depth > 1 {
                state.depth -= 1;
                return;
            }
            state.holder = None;
            state.depth = 0;
        }
        self.semaphore.up(kernel);
    }

    /// Acquire and release when the guard goes out of scope.
    pub fn lock<'l, A: Arch>(&'l self, kernel: &'l Kernel<A>) -> LockGuard<'l, A> {
        self.acquire(kernel);
        LockGuard { lock: self, kernel }
    }

    #[must_use]
    pub fn holder<A: Arch>(&self, kernel: &Kernel<A>) -> Option<Tid> {
        let irq = kernel.irq();
        self.state.borrow(&irq).holder
    }
}

#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'l, A: Arch> {
    lock: &'l Lock,
    kernel: &'l Kernel<A>,
}

impl<A: Arch> Drop for LockGuard<'_, A> {
    fn drop(&mut self) {
        self.lock.release(self.kernel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Sim, boot};
    use kernel_info::memory::MemoryLayout;
    use std::sync::Mutex;

    fn layout() -> MemoryLayout {
        MemoryLayout::from_total_memory(8 * 1024 * 1024).with_pool_pages(16, 4)
    }

    struct Shared {
        lock: Lock,
        semaphore: Semaphore,
        log: Mutex<Vec<String>>,
    }

    fn leak_shared() -> &'static Shared {
        Box::leak(Box::new(Shared {
            lock: Lock::new(),
            semaphore: Semaphore::new(0),
            log: Mutex::new(Vec::new()),
        }))
    }

    fn shared(arg: usize) -> &'static Shared {
        // SAFETY: the tests pass a leaked `Shared`.
        unsafe { &*(arg as *const Shared) }
    }

    fn record(kernel: &Kernel<Sim>, shared: &Shared) {
        let me = kernel.thread_info(kernel.current_thread()).unwrap();
        shared.log.lock().unwrap().push(me.name.to_string());
    }

    #[test]
    fn reentrant_acquire_and_release() {
        let kernel = boot(layout());
        let lock = Lock::new();
        let me = kernel.current_thread();

        lock.acquire(kernel);
        lock.acquire(kernel);
        assert_eq!(lock.holder(kernel), Some(me));

        lock.release(kernel);
        assert_eq!(lock.holder(kernel), Some(me));

        lock.release(kernel);
        assert_eq!(lock.holder(kernel), None);
        assert_eq!(lock.semaphore.value(kernel), 1);
    }

    #[test]
    fn guard_releases_on_drop() {
        let kernel = boot(layout());
        let lock = Lock::new();
        {
            let _outer = lock.lock(kernel);
            let _inner = lock.lock(kernel);
            assert!(lock.holder(kernel).is_some());
        }
        assert_eq!(lock.holder(kernel), None);
    }

    fn contender(kernel: &'static Kernel<Sim>, arg: usize) {
        let shared = shared(arg);
        let _guard = shared.lock.lock(kernel);
        record(kernel, shared);
    }

    #[test]
    fn contended_acquire_blocks_until_release() {
        let kernel = boot(layout());
        let shared = leak_shared();

        shared.lock.acquire(kernel);
        let tid = kernel
            .thread_start("contender", 5, contender, core::ptr::from_ref(shared) as usize)
            .unwrap();
        kernel.thread_yield();

        assert_eq!(kernel.thread_info(tid).unwrap().status, ThreadStatus::Blocked);
        assert_eq!(shared.lock.semaphore.waiters(kernel), 1);
        assert!(shared.log.lock().unwrap().is_empty());

        shared.lock.release(kernel);
        assert_eq!(kernel.thread_info(tid).unwrap().status, ThreadStatus::Ready);
        kernel.thread_yield();

        assert_eq!(*shared.log.lock().unwrap(), ["contender"]);
        assert_eq!(kernel.thread_info(tid).unwrap().status, ThreadStatus::Died);
        assert_eq!(shared.lock.holder(kernel), None);
    }

    #[test]
    fn contender_waits_for_the_outermost_release() {
        let kernel = boot(layout());
        let shared = leak_shared();

        shared.lock.acquire(kernel);
        shared.lock.acquire(kernel);
        let tid = kernel
            .thread_start("contender", 5, contender, core::ptr::from_ref(shared) as usize)
            .unwrap();
        kernel.thread_yield();
        assert_eq!(kernel.thread_info(tid).unwrap().status, ThreadStatus::Blocked);

        shared.lock.release(kernel);
        kernel.thread_yield();
        assert_eq!(kernel.thread_info(tid).unwrap().status, ThreadStatus::Blocked);
        assert_eq!(shared.lock.holder(kernel), Some(kernel.current_thread()));
        assert!(shared.log.lock().unwrap().is_empty());

        shared.lock.release(kernel);
        kernel.thread_yield();
        assert_eq!(*shared.log.lock().unwrap(), ["contender"]);
        assert_eq!(kernel.thread_info(tid).unwrap().status, ThreadStatus::Died);
    }

    #[test]
    #[should_panic(expected = "does not hold")]
    fn releasing_an_unheld_lock_panics() {
        let kernel = boot(layout());
        Lock::new().release(kernel);
    }

    fn waiter(kernel: &'static Kernel<Sim>, arg: usize) {
        let shared = shared(arg);
        shared.semaphore.down(kernel);
        record(kernel, shared);
    }

    #[test]
    fn semaphore_wakes_waiters_in_arrival_order() {
        let kernel = boot(layout());
        let shared = leak_shared();
        let arg = core::ptr::from_ref(shared) as usize;

        kernel.thread_start("first", 5, waiter, arg).unwrap();
        kernel.thread_start("second", 5, waiter, arg).unwrap();
        kernel.thread_yield();
        assert_eq!(shared.semaphore.waiters(kernel), 2);

        shared.semaphore.up(kernel);
        assert_eq!(shared.semaphore.waiters(kernel), 1);
        kernel.thread_yield();
        assert_eq!(*shared.log.lock().unwrap(), ["first"]);

        shared.semaphore.up(kernel);
        kernel.thread_yield();
        assert_eq!(*shared.log.lock().unwrap(), ["first", "second"]);
        assert_eq!(shared.semaphore.value(kernel), 0);
    }
}
