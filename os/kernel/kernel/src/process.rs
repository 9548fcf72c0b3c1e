//! # User processes
//!
//! A process is a thread with its own address space: a page directory whose
//! kernel half is shared with every other space, a virtual pool over the
//! user region and its own heap size classes. The pool bitmap covers
//! `USER_VADDR_START..USER_VADDR_END` and is kept in physically contiguous
//! kernel frames reached through the direct map.
//!
//! [`Kernel::process_fork`] duplicates the running process: every reserved
//! user page is copied into a fresh frame of the child, together with the
//! pool bitmap and the heap bookkeeping that describes those pages.

use crate::Kernel;
use crate::arch::Arch;
use crate::error::{MemoryError, ThreadError};
use crate::thread::{ThreadEntry, Tid};
use kernel_alloc::{SizeClasses, VirtualPool, VmmError};
use kernel_info::memory::{USER_VADDR_PAGES, USER_VADDR_START};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage, pages_for};
use kernel_vmem::{AddressSpace, PageEntryBits, PhysMapperExt};

/// Bytes of the user virtual pool bitmap.
const USER_BITMAP_BYTES: u32 = USER_VADDR_PAGES.div_ceil(8);

/// Kernel frames holding the user virtual pool bitmap.
pub const USER_BITMAP_PAGES: u32 = pages_for(USER_BITMAP_BYTES);

/// The per-process part of a thread control block.
pub(crate) struct Process {
    pub directory: PhysicalPage,
    pub vpool: VirtualPool<'static>,
    pub bitmap: PhysicalPage,
    pub heap: SizeClasses,
}

impl<A: Arch> Kernel<A> {
    /// Start a thread in a fresh address space.
    ///
    /// Reaps dead threads first.
    ///
    /// # Errors
    /// [`ThreadError::Memory`] if the directory, the bitmap or the kernel
    /// stack could not be allocated, [`ThreadError::TableFull`] if every
    /// thread slot is taken. Nothing stays allocated on failure.
    pub fn process_start(
        &'static self,
        name: &str,
        priority: u8,
        entry: ThreadEntry<A>,
        arg: usize,
    ) -> Result<Tid, ThreadError> {
        self.reap();
        let process = self.create_process()?;
        let tid = self.spawn(name, priority, entry, arg, Some(process), None)?;
        log::debug!("started process {name} as {tid}");
        Ok(tid)
    }

    /// Start a copy of the running process.
    ///
    /// The child is named after the parent with a `_fork` suffix, keeps its
    /// priority and records its pid as [`parent_pid`](crate::ThreadInfo::parent_pid).
    /// It owns a private copy of every reserved user page and of the user
    /// heap, and runs `entry(kernel, arg)` on a fresh kernel stack.
    ///
    /// # Errors
    /// - [`MemoryError::NotAProcess`] when called from a kernel thread.
    /// - [`ThreadError::Memory`] or [`ThreadError::TableFull`] as for
    ///   [`process_start`](Self::process_start). Nothing of the child stays
    ///   allocated on failure.
    pub fn process_fork(&'static self, entry: ThreadEntry<A>, arg: usize) -> Result<Tid, ThreadError> {
        self.reap();
        let parent = match self.thread_info(self.current_thread()) {
            Some(parent) if parent.is_process => parent,
            _ => return Err(MemoryError::NotAProcess.into()),
        };

        let mut child = self.create_process()?;
        if let Err(e) = self.copy_user_space(&mut child) {
            log::warn!("cannot fork pid {}: {e}", parent.pid);
            self.release_process(child);
            return Err(e.into());
        }

        let name = parent.name.with_suffix("_fork");
        let tid = self.spawn(name.as_str(), parent.priority, entry, arg, Some(child), Some(parent.pid))?;
        log::debug!("forked pid {} into {name} as {tid}", parent.pid);
        Ok(tid)
    }

    /// Give `child` a private copy of the running process's user half.
    fn copy_user_space(&self, child: &mut Process) -> Result<(), MemoryError> {
        let _user = self.memory.user_lock.lock(self);
        let _kernel = self.memory.kernel_lock.lock(self);
        let irq = self.irq();
        let mut sched = self.sched.borrow(&irq);
        let parent = sched.current_process_mut().ok_or(MemoryError::NotAProcess)?;
        let mut frames = self.memory.user_pool.borrow(&irq);
        let mut tables = self.memory.kernel_pool.borrow(&irq);

        let from = AddressSpace::from_root(&self.arch, parent.directory);
        let to = AddressSpace::from_root(&self.arch, child.directory);
        child.vpool.copy_from(&parent.vpool);
        child.heap = parent.heap.clone();

        let mut copied = 0_usize;
        for page in parent.vpool.reserved_pages() {
            let Some(source) = from.query(page.base()) else {
                unreachable!("reserved user page {page} is not mapped");
            };
            let frame = frames.allocate_frame().ok_or(VmmError::OutOfPhysicalMemory)?;
            if let Err(e) = to.map_one(&mut *tables, page, frame, PageEntryBits::user_rw()) {
                frames.free_frame(frame);
                return Err(VmmError::from(e).into());
            }
            self.arch.frame_mut(frame).copy_from_slice(self.arch.frame_mut(source.page()));
            copied += 1;
        }
        log::debug!("copied {copied} user pages into {}", child.directory);
        Ok(())
    }

    fn create_process(&self) -> Result<Process, MemoryError> {
        let _kernel = self.memory.kernel_lock.lock(self);
        let irq = self.irq();
        let mut pool = self.memory.kernel_pool.borrow(&irq);

        let directory = pool
            .allocate_frame()
            .ok_or(VmmError::OutOfPhysicalMemory)?;
        let Some(bitmap) = pool.allocate_contiguous(USER_BITMAP_PAGES as usize) else {
            pool.free_frame(directory);
            return Err(VmmError::OutOfPhysicalMemory.into());
        };

        self.arch.zero_frame(directory);
        AddressSpace::from_root(&self.arch, directory).init_process(&self.kernel_space());

        // SAFETY: the frames were just taken from the kernel pool and are
        // only ever reached through this pool.
        let storage = unsafe {
            self.arch
                .phys_to_slice_mut(bitmap.base(), (USER_BITMAP_PAGES * PAGE_SIZE) as usize)
        };
        let vpool = VirtualPool::new(USER_VADDR_START, USER_VADDR_PAGES as usize, storage);

        log::debug!("created address space at {directory}, user bitmap at {bitmap}");
        Ok(Process {
            directory,
            vpool,
            bitmap,
            heap: SizeClasses::new(),
        })
    }

    /// Return every frame of a dead process: user pages to the user pool,
    /// user page tables, the directory and the bitmap to the kernel pool.
    pub(crate) fn release_process(&self, process: Process) {
        let _user = self.memory.user_lock.lock(self);
        let _kernel = self.memory.kernel_lock.lock(self);
        let irq = self.irq();
        let mut user = self.memory.user_pool.borrow(&irq);
        let mut kernel = self.memory.kernel_pool.borrow(&irq);

        let Process {
            directory, bitmap, ..
        } = process;
        let mut pages = 0_usize;
        let mut tables = 0_usize;
        AddressSpace::from_root(&self.arch, directory).release_user_half(
            |_, frame| {
                user.free_frame(frame);
                pages += 1;
            },
            |table| {
                kernel.free_frame(table);
                tables += 1;
            },
        );
        kernel.free_frame(directory);
        kernel.free_contiguous(bitmap, USER_BITMAP_PAGES as usize);
        log::debug!("released address space at {directory}: {pages} pages, {tables} tables");
    }
}
