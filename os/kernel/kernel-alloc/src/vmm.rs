//! Page-granular virtual memory manager.
//!
//! A [`Vmm`] ties one [`AddressSpace`] to the [`VirtualPool`] that reserves
//! its addresses and the [`PhysicalPool`]s that back it. It is a short-lived
//! view: the caller holds whatever locks protect the pools, builds a `Vmm`,
//! and drops it when done.
//!
//! Multi-page allocations are all-or-nothing. Frames and mappings granted
//! before a failure are released again before the error is returned.
//!
//! # Example
//! ```ignore
//! let mut vmm = Vmm::new(&arch, kernel_space, &mut kernel_vpool, &mut kernel_pool, None, PageEntryBits::kernel_rw());
//! let base = vmm.allocate(3)?;
//! vmm.free(base, 3);
//! ```

use crate::heap::PageSource;
use crate::phys_pool::PhysicalPool;
use crate::virt_pool::VirtualPool;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress, VirtualPage};
use kernel_vmem::{AddressSpace, MapError, PageEntryBits, PhysMapper, PhysMapperExt, TlbInvalidate};

/// Minimal virtual memory manager over one address space.
pub struct Vmm<'a, 'b, M: PhysMapper + TlbInvalidate> {
    mapper: &'a M,
    aspace: AddressSpace<'a, M>,
    vpool: &'a mut VirtualPool<'b>,
    frames: &'a mut PhysicalPool<'b>,
    tables: Option<&'a mut PhysicalPool<'b>>,
    flags: PageEntryBits,
}

impl<'a, 'b, M: PhysMapper + TlbInvalidate> Vmm<'a, 'b, M> {
    /// Build a manager.
    ///
    /// Data pages come from `frames` and are mapped with `flags`. Missing
    /// page tables come from `tables`, or from `frames` if `None`.
    pub fn new(
        mapper: &'a M,
        aspace: AddressSpace<'a, M>,
        vpool: &'a mut VirtualPool<'b>,
        frames: &'a mut PhysicalPool<'b>,
        tables: Option<&'a mut PhysicalPool<'b>>,
        flags: PageEntryBits,
    ) -> Self {
        Self {
            mapper,
            aspace,
            vpool,
            frames,
            tables,
            flags,
        }
    }

    /// Translate VA→PA if mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.aspace.query(va)
    }

    /// Reserve, back and map `count` pages; the memory is zeroed.
    ///
    /// # Errors
    /// - [`VmmError::OutOfVirtualSpace`] if no run of `count` pages is free.
    /// - [`VmmError::OutOfPhysicalMemory`] or [`VmmError::Map`] if backing a
    ///   page failed. Nothing stays allocated in that case.
    pub fn allocate(&mut self, count: usize) -> Result<VirtualAddress, VmmError> {
        let Some(base) = self.vpool.allocate(count) else {
            log::warn!("no {count} free virtual pages");
            return Err(VmmError::OutOfVirtualSpace { pages: count });
        };

        for (i, n) in (0..count).zip(0u32..) {
            let page = base.page().add_pages(n);
            if let Err(e) = self.back_page(page) {
                log::warn!("allocating {count} pages at {base} failed at page {i}: {e}");
                self.release_mapped(base.page(), i);
                self.vpool.free(base, count);
                return Err(e);
            }
        }

        log::debug!("allocated {count} pages at {base}");
        Ok(base)
    }

    /// Back the specific page containing `va` (loading at a fixed address).
    ///
    /// # Errors
    /// - [`VmmError::OutOfVirtualSpace`] if the page is outside the pool or taken.
    /// - [`VmmError::OutOfPhysicalMemory`] / [`VmmError::Map`] as for [`allocate`](Self::allocate).
    pub fn map_at(&mut self, va: VirtualAddress) -> Result<VirtualAddress, VmmError> {
        let page = va.page();
        if !self.vpool.reserve(page) {
            return Err(VmmError::OutOfVirtualSpace { pages: 1 });
        }
        if let Err(e) = self.back_page(page) {
            self.vpool.free(page.base(), 1);
            return Err(e);
        }
        Ok(page.base())
    }

    /// Unmap `count` pages from `base`, returning frames and addresses.
    ///
    /// ### Panics
    /// If any page is not mapped or not reserved.
    pub fn free(&mut self, base: VirtualAddress, count: usize) {
        assert!(base.is_page_aligned(), "freeing unaligned {base}");
        self.release_mapped(base.page(), count);
        self.vpool.free(base, count);
        log::debug!("freed {count} pages at {base}");
    }

    /// Borrow the bytes of a mapped page through the physical mapping.
    ///
    /// ### Panics
    /// If `page` is not mapped.
    #[must_use]
    pub fn page_mut(&mut self, page: VirtualPage) -> &mut [u8; PAGE_SIZE as usize] {
        let Some(pa) = self.aspace.query(page.base()) else {
            panic!("{page} is not mapped");
        };
        self.mapper.frame_mut(pa.page())
    }

    fn back_page(&mut self, page: VirtualPage) -> Result<(), VmmError> {
        let frame = self
            .frames
            .allocate_frame()
            .ok_or(VmmError::OutOfPhysicalMemory)?;
        let tables = match self.tables.as_deref_mut() {
            Some(tables) => tables,
            None => &mut *self.frames,
        };
        if let Err(e) = self.aspace.map_one(tables, page, frame, self.flags) {
            self.frames.free_frame(frame);
            return Err(e.into());
        }
        self.mapper.zero_frame(frame);
        Ok(())
    }

    fn release_mapped(&mut self, first: VirtualPage, count: usize) {
        for n in (0u32..).take(count) {
            let page = first.add_pages(n);
            let frame = match self.aspace.unmap_one(page) {
                Ok(frame) => frame,
                Err(e) => panic!("freeing pages at {first}: {e}"),
            };
            self.mapper.invalidate_page(page);
            self.frames.free_frame(frame);
        }
    }
}

impl<M: PhysMapper + TlbInvalidate> PageSource for Vmm<'_, '_, M> {
    fn allocate_pages(&mut self, count: usize) -> Result<VirtualAddress, VmmError> {
        self.allocate(count)
    }

    fn free_pages(&mut self, base: VirtualAddress, count: usize) {
        self.free(base, count);
    }

    fn page(&self, page: VirtualPage) -> &[u8; PAGE_SIZE as usize] {
        let Some(pa) = self.aspace.query(page.base()) else {
            panic!("{page} is not mapped");
        };
        self.mapper.frame_mut(pa.page())
    }

    fn page_mut(&mut self, page: VirtualPage) -> &mut [u8; PAGE_SIZE as usize] {
        Vmm::page_mut(self, page)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmmError {
    #[error("out of virtual address space ({pages} pages requested)")]
    OutOfVirtualSpace { pages: usize },
    #[error("out of physical memory")]
    OutOfPhysicalMemory,
    #[error("mapping failed: {0}")]
    Map(#[from] MapError),
}
