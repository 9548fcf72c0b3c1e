//! # Memory services
//!
//! Page and heap allocation on top of `kernel-alloc`, serialized the way the
//! rest of the kernel expects: each physical pool has a [`Lock`] that is held
//! across a whole request, and the pool state itself sits in an [`IrqCell`]
//! that is only borrowed with interrupts off.
//!
//! Kernel pages come from the kernel pool and the kernel virtual pool and
//! are visible in every address space. User pages come from the user pool
//! and the running process's virtual pool; their page tables come from the
//! kernel pool. Lock order is user pool before kernel pool.

use crate::arch::Arch;
use crate::error::MemoryError;
use crate::process::Process;
use crate::sync::Lock;
use crate::Kernel;
use kernel_alloc::{PhysicalPool, SizeClasses, VirtualPool, Vmm};
use kernel_info::memory::{KERNEL_SPACE_START, MemoryLayout};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress, VirtualPage};
use kernel_sync::IrqCell;
use kernel_vmem::{AddressSpace, PageEntryBits, PhysMapperExt};

/// Which physical pool (and matching virtual pool) a request is for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PoolKind {
    Kernel,
    User,
}

/// Page counts of one physical pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PoolUsage {
    pub total: usize,
    pub used: usize,
    pub free: usize,
}

pub(crate) struct Memory {
    pub kernel_pool: IrqCell<PhysicalPool<'static>>,
    pub user_pool: IrqCell<PhysicalPool<'static>>,
    pub kernel_vpool: IrqCell<VirtualPool<'static>>,
    pub kernel_heap: IrqCell<SizeClasses>,
    pub kernel_lock: Lock,
    pub user_lock: Lock,
}

impl Memory {
    /// Build the pools over `bitmaps`, which holds the kernel pool, user pool
    /// and kernel virtual pool bitmaps back to back.
    ///
    /// ### Panics
    /// If `bitmaps` is too short for `layout`.
    pub fn new(layout: &MemoryLayout, bitmaps: &'static mut [u8]) -> Self {
        let (kernel_bits, rest) = bitmaps.split_at_mut(layout.kernel_pool.bitmap_bytes());
        let (user_bits, rest) = rest.split_at_mut(layout.user_pool.bitmap_bytes());
        let (heap_bits, _) = rest.split_at_mut(layout.kernel_heap.bitmap_bytes());

        Self {
            kernel_pool: IrqCell::new(PhysicalPool::new("kernel", layout.kernel_pool, kernel_bits)),
            user_pool: IrqCell::new(PhysicalPool::new("user", layout.user_pool, user_bits)),
            kernel_vpool: IrqCell::new(VirtualPool::new(
                layout.kernel_heap.base,
                layout.kernel_heap.pages as usize,
                heap_bits,
            )),
            kernel_heap: IrqCell::new(SizeClasses::new()),
            kernel_lock: Lock::new(),
            user_lock: Lock::new(),
        }
    }

    /// Bytes of bitmap storage [`Memory::new`] needs for `layout`.
    #[must_use]
    pub const fn bitmap_bytes(layout: &MemoryLayout) -> usize {
        layout.kernel_pool.bitmap_bytes()
            + layout.user_pool.bitmap_bytes()
            + layout.kernel_heap.bitmap_bytes()
    }
}

impl<A: Arch> Kernel<A> {
    pub(crate) fn kernel_space(&self) -> AddressSpace<'_, A> {
        AddressSpace::from_root(&self.arch, self.kernel_directory)
    }

    fn kernel_vmm<'a>(
        &'a self,
        vpool: &'a mut VirtualPool<'static>,
        frames: &'a mut PhysicalPool<'static>,
    ) -> Vmm<'a, 'static, A> {
        Vmm::new(
            &self.arch,
            self.kernel_space(),
            vpool,
            frames,
            None,
            PageEntryBits::kernel_rw(),
        )
    }

    fn user_vmm<'a>(
        &'a self,
        process: &'a mut Process,
        frames: &'a mut PhysicalPool<'static>,
        tables: &'a mut PhysicalPool<'static>,
    ) -> (Vmm<'a, 'static, A>, &'a mut SizeClasses) {
        let Process {
            directory,
            vpool,
            heap,
            ..
        } = process;
        let vmm = Vmm::new(
            &self.arch,
            AddressSpace::from_root(&self.arch, *directory),
            vpool,
            frames,
            Some(tables),
            PageEntryBits::user_rw(),
        );
        (vmm, heap)
    }

    /// Run `f` on the user half of the running process.
    fn with_user_space<R>(
        &self,
        f: impl FnOnce(Vmm<'_, 'static, A>, &mut SizeClasses) -> R,
    ) -> Result<R, MemoryError> {
        let _user = self.memory.user_lock.lock(self);
        let _kernel = self.memory.kernel_lock.lock(self);
        let irq = self.irq();
        let mut sched = self.sched.borrow(&irq);
        let process = sched.current_process_mut().ok_or(MemoryError::NotAProcess)?;
        let mut frames = self.memory.user_pool.borrow(&irq);
        let mut tables = self.memory.kernel_pool.borrow(&irq);
        let (vmm, heap) = self.user_vmm(process, &mut *frames, &mut *tables);
        Ok(f(vmm, heap))
    }

    /// Run `f` on the kernel half.
    fn with_kernel_space<R>(&self, f: impl FnOnce(Vmm<'_, 'static, A>, &mut SizeClasses) -> R) -> R {
        let _kernel = self.memory.kernel_lock.lock(self);
        let irq = self.irq();
        let mut vpool = self.memory.kernel_vpool.borrow(&irq);
        let mut frames = self.memory.kernel_pool.borrow(&irq);
        let mut heap = self.memory.kernel_heap.borrow(&irq);
        f(self.kernel_vmm(&mut *vpool, &mut *frames), &mut *heap)
    }

    /// Allocate `count` zeroed, contiguous kernel pages.
    ///
    /// # Errors
    /// [`MemoryError::Vmm`] if the kernel pool or the kernel heap region is
    /// exhausted. Nothing stays allocated on failure.
    pub fn allocate_kernel_pages(&self, count: usize) -> Result<VirtualAddress, MemoryError> {
        Ok(self.with_kernel_space(|mut vmm, _| vmm.allocate(count))?)
    }

    /// Allocate `count` zeroed, contiguous pages in the running process.
    ///
    /// # Errors
    /// - [`MemoryError::NotAProcess`] when called from a kernel thread.
    /// - [`MemoryError::Vmm`] on exhaustion; nothing stays allocated.
    pub fn allocate_user_pages(&self, count: usize) -> Result<VirtualAddress, MemoryError> {
        Ok(self.with_user_space(|mut vmm, _| vmm.allocate(count))??)
    }

    /// Release `count` pages from `base`. Kernel addresses go back to the
    /// kernel pools, user addresses to the running process's pools.
    ///
    /// ### Panics
    /// If a page is not mapped, or a user address is freed outside a process.
    pub fn free_pages(&self, base: VirtualAddress, count: usize) {
        if base >= KERNEL_SPACE_START {
            self.with_kernel_space(|mut vmm, _| vmm.free(base, count));
        } else if self.with_user_space(|mut vmm, _| vmm.free(base, count)).is_err() {
            panic!("freeing user pages at {base} outside a process");
        }
    }

    /// Back the page containing `va` with a fresh frame from `pool`.
    ///
    /// # Errors
    /// - [`MemoryError::Vmm`] if the page is outside the pool's region,
    ///   already reserved, or no frame is left.
    /// - [`MemoryError::NotAProcess`] for [`PoolKind::User`] outside a process.
    pub fn map_page_at(&self, pool: PoolKind, va: VirtualAddress) -> Result<VirtualAddress, MemoryError> {
        let mapped = match pool {
            PoolKind::Kernel => self.with_kernel_space(|mut vmm, _| vmm.map_at(va))?,
            PoolKind::User => self.with_user_space(|mut vmm, _| vmm.map_at(va))??,
        };
        log::debug!("mapped {pool:?} page at {mapped}");
        Ok(mapped)
    }

    /// Translate `va` in the running thread's address space.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let directory = {
            let irq = self.irq();
            let sched = self.sched.borrow(&irq);
            sched.current_directory()
        };
        AddressSpace::from_root(&self.arch, directory.unwrap_or(self.kernel_directory)).query(va)
    }

    /// Allocate `size` bytes from the kernel heap, or from the running
    /// process's heap when called in a process.
    ///
    /// # Errors
    /// [`MemoryError::Heap`] for zero-sized or unsatisfiable requests.
    pub fn heap_allocate(&self, size: usize) -> Result<VirtualAddress, MemoryError> {
        let block = if self.current_is_process() {
            self.with_user_space(|mut vmm, heap| heap.allocate(&mut vmm, size))??
        } else {
            self.with_kernel_space(|mut vmm, heap| heap.allocate(&mut vmm, size))?
        };
        log::trace!("heap: {size} bytes at {block}");
        Ok(block)
    }

    /// Return a block from [`heap_allocate`](Self::heap_allocate). The heap
    /// is picked by address: kernel half or the running process.
    ///
    /// ### Panics
    /// If `addr` is not a live heap block.
    pub fn heap_free(&self, addr: VirtualAddress) {
        if addr >= KERNEL_SPACE_START {
            self.with_kernel_space(|mut vmm, heap| heap.free(&mut vmm, addr));
        } else if self.with_user_space(|mut vmm, heap| heap.free(&mut vmm, addr)).is_err() {
            panic!("freeing user block {addr} outside a process");
        }
    }

    #[must_use]
    pub fn pool_usage(&self, pool: PoolKind) -> PoolUsage {
        self.with_pool(pool, |p| PoolUsage {
            total: p.total_pages(),
            used: p.used_pages(),
            free: p.free_pages(),
        })
    }

    /// Inspect a physical pool with interrupts off.
    pub fn with_pool<R>(&self, pool: PoolKind, f: impl FnOnce(&PhysicalPool<'static>) -> R) -> R {
        let irq = self.irq();
        let cell = match pool {
            PoolKind::Kernel => &self.memory.kernel_pool,
            PoolKind::User => &self.memory.user_pool,
        };
        let pool = cell.borrow(&irq);
        f(&pool)
    }

    /// Bytes of a mapped kernel page.
    ///
    /// ### Panics
    /// If `page` is not mapped.
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn kernel_page_mut(&self, page: VirtualPage) -> &mut [u8; PAGE_SIZE as usize] {
        let Some(pa) = self.kernel_space().query(page.base()) else {
            panic!("kernel page {page} is not mapped");
        };
        self.arch.frame_mut(pa.page())
    }

    fn current_is_process(&self) -> bool {
        let irq = self.irq();
        self.sched.borrow(&irq).current_directory().is_some()
    }
}
