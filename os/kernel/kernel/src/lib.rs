//! # Kernel core
//!
//! The part of the kernel every other subsystem stands on: memory services,
//! threads and processes, and the blocking primitives used to coordinate
//! them on a single CPU.
//!
//! ## Kernel context
//!
//! All mutable kernel state lives in one [`Kernel`] value created at boot
//! and given a `'static` home before threads start. Nothing is reachable
//! through file-scope globals:
//!
//! ```text
//! Kernel<A: Arch>
//! ├─ arch              CPU seam: IF flag, CR3, invlpg, context switch, timer
//! ├─ kernel_directory  page directory shared by every kernel thread
//! ├─ memory
//! │  ├─ kernel_pool    IrqCell<PhysicalPool>   kernel pages, page tables
//! │  ├─ user_pool      IrqCell<PhysicalPool>   process pages
//! │  ├─ kernel_vpool   IrqCell<VirtualPool>    kernel heap region
//! │  ├─ kernel_heap    IrqCell<SizeClasses>
//! │  └─ kernel_lock / user_lock
//! └─ sched             IrqCell<Scheduler>
//!    ├─ thread table   [Option<Thread>; MAX_THREADS], indexed by Tid
//!    ├─ ready queue    FIFO; woken threads go to the front
//!    └─ all threads    creation order, for `ps` and reaping
//! ```
//!
//! Every `IrqCell` can only be borrowed while an interrupt guard is alive,
//! which is the whole of the mutual exclusion on one CPU. The pool locks
//! additionally keep a multi-step request (reserve, back, map) from being
//! interleaved with another thread's.
//!
//! ## Threads
//!
//! A thread is created [`Ready`](ThreadStatus::Ready) with a quantum equal
//! to its priority. The timer tick charges the running thread and calls the
//! scheduler once the quantum is used up; the scheduler re-queues it at the
//! tail and dispatches the head of the ready queue. Blocking takes a thread
//! off the CPU until someone unblocks it, which puts it at the *front* of
//! the ready queue. When the entry function returns the thread is marked
//! [`Died`](ThreadStatus::Died); its stack and address space are reclaimed by
//! [`Kernel::reap`], which thread and process creation run first.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod arch;
mod error;
mod ioqueue;
mod memory;
mod process;
mod sched;
mod sync;
mod thread;

#[cfg(test)]
mod sim;

#[cfg(target_arch = "x86")]
pub mod x86;

pub use arch::{Arch, ContextEntry};
pub use error::{MemoryError, ThreadError};
pub use ioqueue::{IO_QUEUE_SIZE, IoQueue};
pub use memory::{PoolKind, PoolUsage};
pub use process::USER_BITMAP_PAGES;
pub use sync::{Lock, LockGuard, Semaphore};
pub use thread::{ThreadEntry, ThreadInfo, ThreadName, ThreadSnapshot, ThreadStatus, Tid};

use kernel_info::memory::{KERNEL_PAGE_DIRECTORY, MemoryLayout};
use kernel_info::sched::IDLE_PRIORITY;
use kernel_memory_addresses::PhysicalPage;
use kernel_sync::{IrqCell, IrqGuard};
use memory::Memory;
use sched::Scheduler;

/// The kernel context.
pub struct Kernel<A: Arch> {
    arch: A,
    layout: MemoryLayout,
    kernel_directory: PhysicalPage,
    memory: Memory,
    sched: IrqCell<Scheduler<A>>,
}

impl<A: Arch> Kernel<A> {
    /// Take over from the boot flow.
    ///
    /// `bitmaps` holds the pool bitmaps (see [`Kernel::bitmap_bytes`]). The
    /// kernel page directory must be the one the loader left at
    /// [`KERNEL_PAGE_DIRECTORY`]. The caller becomes the `main` thread.
    pub fn new(arch: A, layout: MemoryLayout, bitmaps: &'static mut [u8]) -> Self {
        log::info!(
            concat!(
                "memory: {total} bytes\n",
                "  kernel pool {kbase}, {kpages} pages\n",
                "  user pool   {ubase}, {upages} pages\n",
                "  kernel heap {hbase}, {hpages} pages"
            ),
            total = layout.total_memory,
            kbase = layout.kernel_pool.base,
            kpages = layout.kernel_pool.pages,
            ubase = layout.user_pool.base,
            upages = layout.user_pool.pages,
            hbase = layout.kernel_heap.base,
            hpages = layout.kernel_heap.pages,
        );

        Self {
            arch,
            layout,
            kernel_directory: KERNEL_PAGE_DIRECTORY.page(),
            memory: Memory::new(&layout, bitmaps),
            sched: IrqCell::new(Scheduler::new()),
        }
    }

    /// Bytes of bitmap storage [`Kernel::new`] needs for `layout`.
    #[must_use]
    pub const fn bitmap_bytes(layout: &MemoryLayout) -> usize {
        Memory::bitmap_bytes(layout)
    }

    /// Start the idle thread and the timer. From here on the scheduler runs.
    ///
    /// # Errors
    /// If the idle thread cannot be created.
    pub fn start(&'static self) -> Result<(), ThreadError> {
        let idle = self.thread_start("idle", IDLE_PRIORITY, idle_loop::<A>, 0)?;
        {
            let irq = self.irq();
            self.sched.borrow(&irq).set_idle(idle);
        }
        self.arch
            .register_timer(timer_tick::<A>, core::ptr::from_ref(self) as usize);
        log::info!("scheduler started, idle is {idle}");
        Ok(())
    }

    #[must_use]
    pub const fn arch(&self) -> &A {
        &self.arch
    }

    #[must_use]
    pub const fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    #[inline]
    pub(crate) fn irq(&self) -> IrqGuard<'_, A> {
        IrqGuard::new(&self.arch)
    }
}

fn idle_loop<A: Arch>(kernel: &'static Kernel<A>, _: usize) {
    loop {
        kernel.thread_block(ThreadStatus::Blocked);
        kernel.arch.halt();
    }
}

extern "C" fn timer_tick<A: Arch>(kernel: usize) {
    // SAFETY: registered by `Kernel::start` with a `&'static Kernel<A>`.
    let kernel = unsafe { &*(kernel as *const Kernel<A>) };
    kernel.timer_interrupt();
}
