//! # Scheduler
//!
//! Static-priority round robin on one CPU. The priority of a thread is also
//! its time quantum in timer ticks.
//!
//! ```text
//!   thread_start ──► READY ◄──────────── quantum used up / yield (tail)
//!                      │  ▲
//!           dispatched │  │ unblock (front)
//!                      ▼  │
//!                   RUNNING ──► BLOCKED / WAITING / HANGING
//!                      │
//!                      └─ entry returns ──► DIED ──► reap
//! ```
//!
//! The ready queue and the semaphore wait queues share one link table: a
//! thread is on at most one of them at a time. The all-threads queue has a
//! link table of its own.

use crate::Kernel;
use crate::arch::Arch;
use crate::error::ThreadError;
use crate::process::Process;
use crate::thread::{Thread, ThreadEntry, ThreadInfo, ThreadSnapshot, ThreadStatus, Tid};
use core::ptr;
use kernel_collections::{Link, List};
use kernel_info::sched::{MAIN_PRIORITY, MAX_THREADS, STACK_GUARD};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage, VirtualAddress};
use kernel_sync::IrqGuard;

pub(crate) struct Scheduler<A: Arch> {
    threads: [Option<Thread<A>>; MAX_THREADS],
    /// Links of the ready queue and of every semaphore wait queue.
    general: [Link<Tid>; MAX_THREADS],
    /// Links of the all-threads queue.
    all: [Link<Tid>; MAX_THREADS],
    ready: List<Tid>,
    all_threads: List<Tid>,
    current: Tid,
    idle: Option<Tid>,
    next_pid: u32,
    ticks: u64,
}

impl<A: Arch> Scheduler<A> {
    /// A scheduler whose only thread is `main`, the running boot flow.
    pub fn new() -> Self {
        let mut sched = Self {
            threads: [const { None }; MAX_THREADS],
            general: [Link::UNLINKED; MAX_THREADS],
            all: [Link::UNLINKED; MAX_THREADS],
            ready: List::new(),
            all_threads: List::new(),
            current: Tid::new(0),
            idle: None,
            next_pid: 1,
            ticks: 0,
        };
        let pid = sched.allocate_pid();
        let mut main = Thread::new("main", pid, MAIN_PRIORITY, None);
        main.status = ThreadStatus::Running;
        sched.threads[0] = Some(main);
        sched.all_threads.push_back(&mut sched.all[..], Tid::new(0));
        sched
    }

    fn allocate_pid(&mut self) -> u32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    pub fn set_idle(&mut self, idle: Tid) {
        self.idle = Some(idle);
    }

    fn thread(&self, tid: Tid) -> &Thread<A> {
        match &self.threads[tid.slot()] {
            Some(thread) => thread,
            None => panic!("{tid} does not exist"),
        }
    }

    fn thread_mut(&mut self, tid: Tid) -> &mut Thread<A> {
        match &mut self.threads[tid.slot()] {
            Some(thread) => thread,
            None => panic!("{tid} does not exist"),
        }
    }

    /// Put `thread` into a free slot.
    fn insert(&mut self, thread: Thread<A>) -> Result<Tid, Thread<A>> {
        let Some(slot) = self.threads.iter().position(Option::is_none) else {
            return Err(thread);
        };
        self.threads[slot] = Some(thread);
        Ok(Tid::new(slot))
    }

    /// Page directory of the running thread; `None` for kernel threads.
    pub fn current_directory(&self) -> Option<PhysicalPage> {
        self.thread(self.current).process.as_ref().map(|p| p.directory)
    }

    pub fn current_process_mut(&mut self) -> Option<&mut Process> {
        let current = self.current;
        self.thread_mut(current).process.as_mut()
    }

    fn push_ready_back(&mut self, tid: Tid) {
        debug_assert!(!self.ready.contains(&self.general[..], tid));
        self.ready.push_back(&mut self.general[..], tid);
    }

    fn push_ready_front(&mut self, tid: Tid) {
        debug_assert!(!self.ready.contains(&self.general[..], tid));
        self.ready.push_front(&mut self.general[..], tid);
    }

    /// Mark a blocked thread ready and queue it at the front.
    fn wake(&mut self, tid: Tid) {
        let thread = self.thread_mut(tid);
        assert!(
            thread.status.is_blocked(),
            "unblocking {tid} ({}) in state {:?}",
            thread.name,
            thread.status
        );
        thread.status = ThreadStatus::Ready;
        self.push_ready_front(tid);
    }

    /// Take the next thread off the ready queue, waking `idle` if the queue
    /// is empty.
    fn pick_next(&mut self) -> Tid {
        if self.ready.is_empty() {
            let Some(idle) = self.idle else {
                panic!("no thread is ready to run");
            };
            self.wake(idle);
        }
        let Some(next) = self.ready.pop_front(&mut self.general[..]) else {
            panic!("no thread is ready to run");
        };
        next
    }

    /// Oldest dead thread other than the running one, taken out of the table.
    fn take_dead(&mut self) -> Option<(Tid, Thread<A>)> {
        let current = self.current;
        let tid = self.all_threads.find(&self.all[..], |&tid| {
            tid != current && self.thread(tid).status == ThreadStatus::Died
        })?;
        self.all_threads.remove(&mut self.all[..], tid);
        let thread = self.threads[tid.slot()].take()?;
        Some((tid, thread))
    }
}

impl<A: Arch> Kernel<A> {
    /// Handle of the running thread.
    #[must_use]
    pub fn current_thread(&self) -> Tid {
        let irq = self.irq();
        self.sched.borrow(&irq).current
    }

    /// Timer interrupts since boot.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        let irq = self.irq();
        self.sched.borrow(&irq).ticks
    }

    #[must_use]
    pub fn thread_info(&self, tid: Tid) -> Option<ThreadInfo> {
        let irq = self.irq();
        let sched = self.sched.borrow(&irq);
        sched.threads[tid.slot()].as_ref().map(|t| t.info(tid))
    }

    /// Every thread on the all-threads queue, including dead ones not yet reaped.
    #[must_use]
    pub fn threads(&self) -> ThreadSnapshot {
        let mut snapshot = ThreadSnapshot::new();
        let irq = self.irq();
        let sched = self.sched.borrow(&irq);
        for tid in sched.all_threads.iter(&sched.all[..]) {
            snapshot.push(sched.thread(tid).info(tid));
        }
        snapshot
    }

    /// Log the thread table like `ps` would print it.
    pub fn log_threads(&self) {
        log::info!("PID  PPID STAT     TICKS  NAME");
        for t in self.threads().iter() {
            log::info!(
                "{pid:<4} {ppid:<4} {status:<8} {ticks:<6} {name}",
                pid = t.pid,
                ppid = PpidColumn(t.parent_pid),
                status = match t.status {
                    ThreadStatus::Running => "RUNNING",
                    ThreadStatus::Ready => "READY",
                    ThreadStatus::Blocked => "BLOCKED",
                    ThreadStatus::Waiting => "WAITING",
                    ThreadStatus::Hanging => "HANGING",
                    ThreadStatus::Died => "DIED",
                },
                ticks = t.elapsed_ticks,
                name = t.name,
            );
        }
    }

    /// Start a kernel thread running `entry(kernel, arg)`.
    ///
    /// Reaps dead threads first. The thread is queued at the tail of the
    /// ready queue with a full quantum of `priority` ticks.
    ///
    /// # Errors
    /// [`ThreadError::Memory`] if no kernel page is left for the stack,
    /// [`ThreadError::TableFull`] if every slot is taken.
    ///
    /// ### Panics
    /// If `priority` is zero.
    pub fn thread_start(
        &'static self,
        name: &str,
        priority: u8,
        entry: ThreadEntry<A>,
        arg: usize,
    ) -> Result<Tid, ThreadError> {
        self.reap();
        let tid = self.spawn(name, priority, entry, arg, None, None)?;
        log::debug!("started thread {name} as {tid}, priority {priority}");
        Ok(tid)
    }

    /// Create a thread around an optional process. On failure the process
    /// is released again.
    pub(crate) fn spawn(
        &'static self,
        name: &str,
        priority: u8,
        entry: ThreadEntry<A>,
        arg: usize,
        process: Option<Process>,
        parent_pid: Option<u32>,
    ) -> Result<Tid, ThreadError> {
        assert!(priority > 0, "thread {name} needs a non-zero priority");

        let stack = match self.allocate_kernel_pages(1) {
            Ok(stack) => stack,
            Err(e) => {
                if let Some(process) = process {
                    self.release_process(process);
                }
                return Err(e.into());
            }
        };
        self.kernel_page_mut(stack.page())[..4].copy_from_slice(&STACK_GUARD.to_le_bytes());

        let inserted = {
            let irq = self.irq();
            let mut sched = self.sched.borrow(&irq);
            let pid = sched.allocate_pid();
            let mut thread = Thread::new(name, pid, priority, Some(stack));
            thread.entry = Some((entry, arg));
            thread.process = process;
            thread.parent_pid = parent_pid;
            match sched.insert(thread) {
                Ok(tid) => {
                    self.arch.prepare_context(
                        &mut sched.thread_mut(tid).context,
                        stack + PAGE_SIZE,
                        thread_trampoline::<A>,
                        ptr::from_ref(self) as usize,
                    );
                    sched.push_ready_back(tid);
                    let Scheduler {
                        all_threads, all, ..
                    } = &mut *sched;
                    all_threads.push_back(&mut all[..], tid);
                    Ok(tid)
                }
                Err(thread) => Err(thread),
            }
        };

        inserted.or_else(|thread| {
            log::warn!("cannot start {name}: thread table is full");
            self.free_pages(stack, 1);
            if let Some(process) = thread.process {
                self.release_process(process);
            }
            Err(ThreadError::TableFull)
        })
    }

    /// Block the running thread with `status` until [`thread_unblock`](Self::thread_unblock).
    ///
    /// ### Panics
    /// If `status` is not one of the blocked states.
    pub fn thread_block(&self, status: ThreadStatus) {
        let irq = self.irq();
        self.block_current(status, &irq);
    }

    pub(crate) fn block_current(&self, status: ThreadStatus, irq: &IrqGuard<'_, A>) {
        assert!(status.is_blocked(), "cannot block with status {status:?}");
        {
            let mut sched = self.sched.borrow(irq);
            let current = sched.current;
            sched.thread_mut(current).status = status;
        }
        self.schedule(irq);
    }

    /// Make a blocked thread ready and put it at the front of the ready queue.
    ///
    /// ### Panics
    /// If the thread is not blocked.
    pub fn thread_unblock(&self, tid: Tid) {
        let irq = self.irq();
        self.sched.borrow(&irq).wake(tid);
    }

    /// Give up the CPU, keeping the remaining quantum.
    pub fn thread_yield(&self) {
        let irq = self.irq();
        {
            let mut sched = self.sched.borrow(&irq);
            let current = sched.current;
            sched.thread_mut(current).status = ThreadStatus::Ready;
            sched.push_ready_back(current);
        }
        self.schedule(&irq);
    }

    /// End the running thread. Its resources stay until [`reap`](Self::reap).
    pub fn thread_exit(&self) -> ! {
        let irq = self.irq();
        {
            let mut sched = self.sched.borrow(&irq);
            let current = sched.current;
            let thread = sched.thread_mut(current);
            thread.status = ThreadStatus::Died;
            log::debug!("{current} ({}) exited after {} ticks", thread.name, thread.elapsed_ticks);
        }
        self.schedule(&irq);
        unreachable!("a dead thread was scheduled again");
    }

    /// Reclaim every dead thread except the running one: its stack page, its
    /// slot, and for processes the whole address space. Returns the count.
    pub fn reap(&self) -> usize {
        let mut reaped = 0;
        loop {
            let dead = {
                let irq = self.irq();
                self.sched.borrow(&irq).take_dead()
            };
            let Some((tid, thread)) = dead else {
                break;
            };
            if let Some(stack) = thread.stack {
                self.free_pages(stack, 1);
            }
            if let Some(process) = thread.process {
                self.release_process(process);
            }
            log::debug!("reaped {tid} ({}, pid {})", thread.name, thread.pid);
            reaped += 1;
        }
        reaped
    }

    /// Account one timer tick to the running thread and preempt it once its
    /// quantum is used up.
    ///
    /// ### Panics
    /// If the stack guard of the running thread was overwritten.
    pub fn timer_interrupt(&self) {
        let irq = self.irq();
        let expired = {
            let mut sched = self.sched.borrow(&irq);
            sched.ticks += 1;
            let current = sched.current;
            let thread = sched.thread_mut(current);
            if let Some(stack) = thread.stack {
                assert!(
                    self.stack_guard_intact(stack),
                    "stack guard of {current} ({}) overwritten",
                    thread.name
                );
            }
            thread.elapsed_ticks += 1;
            thread.ticks = thread.ticks.saturating_sub(1);
            thread.ticks == 0
        };
        if expired {
            log::trace!("quantum expired");
            self.schedule(&irq);
        }
    }

    fn stack_guard_intact(&self, stack: VirtualAddress) -> bool {
        let page = self.kernel_page_mut(stack.page());
        page[..4] == STACK_GUARD.to_le_bytes()
    }

    /// Switch to the next ready thread. Interrupts must be off.
    fn schedule(&self, irq: &IrqGuard<'_, A>) {
        let (previous, next, directory) = {
            let mut sched = self.sched.borrow(irq);
            let current = sched.current;
            let thread = sched.thread_mut(current);
            if thread.status == ThreadStatus::Running {
                thread.ticks = thread.priority;
                thread.status = ThreadStatus::Ready;
                sched.push_ready_back(current);
            }

            let next = sched.pick_next();
            sched.current = next;
            let thread = sched.thread_mut(next);
            thread.status = ThreadStatus::Running;
            let directory = thread.process.as_ref().map(|p| p.directory);
            let next_context = ptr::from_ref(&thread.context);

            if next == current {
                (None, next_context, directory)
            } else {
                log::trace!("switch {current} -> {next}");
                let previous = ptr::from_mut(&mut sched.thread_mut(current).context);
                (Some(previous), next_context, directory)
            }
        };

        self.arch.activate(directory.unwrap_or(self.kernel_directory));
        if let Some(previous) = previous {
            // SAFETY: both contexts live in the thread table, and neither
            // slot is released while its thread can still be switched to.
            unsafe { self.arch.switch_context(previous, next) };
        }
    }

    /// Queue the running thread on a wait queue. The caller blocks it next.
    pub(crate) fn enqueue_current(&self, waiters: &mut List<Tid>, irq: &IrqGuard<'_, A>) {
        let mut sched = self.sched.borrow(irq);
        let current = sched.current;
        debug_assert!(!waiters.contains(&sched.general[..], current));
        waiters.push_back(&mut sched.general[..], current);
    }

    /// Take the longest waiting thread off a wait queue.
    pub(crate) fn dequeue(&self, waiters: &mut List<Tid>, irq: &IrqGuard<'_, A>) -> Option<Tid> {
        let mut sched = self.sched.borrow(irq);
        waiters.pop_front(&mut sched.general[..])
    }

    fn current_entry(&self) -> (ThreadEntry<A>, usize) {
        let irq = self.irq();
        let sched = self.sched.borrow(&irq);
        let current = sched.current;
        match sched.thread(current).entry {
            Some(entry) => entry,
            None => panic!("{current} has no entry function"),
        }
    }
}

/// `NULL` for threads without a parent, like `ps` prints it.
struct PpidColumn(Option<u32>);

impl core::fmt::Display for PpidColumn {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.0 {
            Some(pid) => core::fmt::Display::fmt(&pid, f),
            None => f.pad("NULL"),
        }
    }
}

/// First code of every new thread.
extern "C" fn thread_trampoline<A: Arch>(kernel: usize) {
    // SAFETY: `spawn` passes a `&'static Kernel<A>`.
    let kernel = unsafe { &*(kernel as *const Kernel<A>) };
    kernel.arch.enable();
    let (entry, arg) = kernel.current_entry();
    entry(kernel, arg);
    kernel.thread_exit();
}
