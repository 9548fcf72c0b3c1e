//! # Address Space (x86, page-directory rooted)
//!
//! Strongly-typed helpers to build and manipulate a **single** virtual address
//! space (tree rooted at a page directory).
//!
//! ## Highlights
//!
//! - [`AddressSpace::map_one`] installs one 4 KiB mapping, creating the page
//!   table on demand from a [`FrameAlloc`].
//! - [`AddressSpace::unmap_one`] clears one PTE and hands back the frame.
//! - [`AddressSpace::query`] translates a VA to a PA.
//! - [`AddressSpace::init_kernel`] and [`AddressSpace::init_process`] lay out
//!   fresh directories; [`AddressSpace::release_user_half`] tears one down.
//!
//! ## Safety
//!
//! - Mutating active mappings requires appropriate **TLB maintenance**
//!   (`invlpg` per page or a CR3 reload). This module never touches the TLB.
//! - The provided `PhysMapper` must yield **writable** references to table frames.

use crate::page_table::pd::{DirectoryIndex, PageDirectory, PdEntry};
use crate::page_table::pt::{PageTable, PtEntry};
use crate::page_table::split_indices;
use crate::{FrameAlloc, MapError, PageEntryBits, PhysMapper, PhysMapperExt};
use kernel_info::memory::{KERNEL_DIRECTORY_START, KERNEL_PAGE_TABLES};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage,
    mapper: &'m M,
}

/// The page directory frame of an [`AddressSpace`].
pub type RootPage = PhysicalPage;

/// Directory slots shared between the kernel and every process.
const KERNEL_SLOTS: core::ops::Range<u16> =
    KERNEL_DIRECTORY_START as u16..DirectoryIndex::SELF_MAP.as_usize() as u16;

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    #[inline]
    pub const fn from_root(mapper: &'m M, root: RootPage) -> Self {
        Self { root, mapper }
    }

    /// Physical page of the directory.
    #[inline]
    pub const fn root_page(&self) -> RootPage {
        self.root
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn directory_mut(&self) -> &mut PageDirectory {
        self.mapper.directory_mut(self.root)
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn table_mut(&self, page: PhysicalPage) -> &mut PageTable {
        self.mapper.table_mut(page)
    }

    /// Lay out the kernel directory as the loader does.
    ///
    /// The directory is zeroed, slots `768..1023` link the
    /// [`KERNEL_PAGE_TABLES`] frames immediately following `root`, and slot
    /// 1023 maps the directory onto itself. Every table frame is zeroed.
    pub fn init_kernel(&self) {
        self.directory_mut().zero();
        for (n, slot) in KERNEL_SLOTS.enumerate() {
            let table = self.root.add_pages(1 + n as u32);
            self.mapper.zero_frame(table);
            self.directory_mut().set(
                DirectoryIndex::new(slot),
                PdEntry::make_table(table, PageEntryBits::kernel_rw()),
            );
        }
        debug_assert_eq!(KERNEL_SLOTS.len(), KERNEL_PAGE_TABLES as usize);
        self.self_map();
    }

    /// Lay out a fresh process directory: empty user half, kernel half
    /// copied from `kernel`, self-map in slot 1023.
    pub fn init_process(&self, kernel: &AddressSpace<'_, M>) {
        self.directory_mut().zero();
        self.share_kernel_half(kernel);
        self.self_map();
    }

    /// Point slot 1023 at the directory itself.
    pub fn self_map(&self) {
        self.directory_mut().set(
            DirectoryIndex::SELF_MAP,
            PdEntry::make_table(self.root, PageEntryBits::kernel_rw()),
        );
    }

    /// Copy the kernel-half directory entries from `kernel`.
    ///
    /// The page tables themselves are shared, not copied.
    pub fn share_kernel_half(&self, kernel: &AddressSpace<'_, M>) {
        for slot in KERNEL_SLOTS {
            let i = DirectoryIndex::new(slot);
            let e = kernel.directory_mut().get(i);
            self.directory_mut().set(i, e);
        }
    }

    /// Map **one** 4 KiB page `page → frame` with `flags`.
    ///
    /// A missing page table is allocated from `alloc`, zeroed, and linked
    /// with [`PageEntryBits::table_link`].
    ///
    /// # Errors
    /// - [`MapError::OutOfMemory`] if a page table was needed and `alloc` had none.
    /// - [`MapError::AlreadyMapped`] if the PTE is already present.
    pub fn map_one<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        page: VirtualPage,
        frame: PhysicalPage,
        flags: PageEntryBits,
    ) -> Result<(), MapError> {
        let va = page.base();
        let (di, ti) = split_indices(va);
        debug_assert_ne!(di, DirectoryIndex::SELF_MAP, "{va} lies in the self-map");

        let table = match self.directory_mut().get(di).next_table() {
            Some(table) => table,
            None => {
                let table = alloc.alloc_4k().ok_or(MapError::OutOfMemory(va))?;
                log::trace!("new page table {table} for slot {}", di.as_usize());
                self.mapper.zero_frame(table);
                self.directory_mut()
                    .set(di, PdEntry::make_table(table, PageEntryBits::table_link()));
                table
            }
        };

        let pt = self.table_mut(table);
        if pt.get(ti).is_present() {
            return Err(MapError::AlreadyMapped(va));
        }
        pt.set(ti, PtEntry::make_4k(frame, flags));
        Ok(())
    }

    /// Unmap a single **4 KiB** page and return the frame it mapped.
    ///
    /// The page table stays in place even if it becomes empty.
    ///
    /// # Errors
    /// - [`MapError::NotMapped`] if the PDE or PTE is absent.
    pub fn unmap_one(&self, page: VirtualPage) -> Result<PhysicalPage, MapError> {
        let va = page.base();
        let pte = self.leaf(va).ok_or(MapError::NotMapped(va))?;
        let (frame, _) = pte.page_4k().ok_or(MapError::NotMapped(va))?;

        let (di, ti) = split_indices(va);
        if let Some(table) = self.directory_mut().get(di).next_table() {
            self.table_mut(table).set(ti, PtEntry::zero());
        }
        Ok(frame)
    }

    /// The present PTE for `va`, if any.
    #[must_use]
    pub fn leaf(&self, va: VirtualAddress) -> Option<PtEntry> {
        let (di, ti) = split_indices(va);
        let table = self.directory_mut().get(di).next_table()?;
        let e = self.table_mut(table).get(ti);
        e.is_present().then_some(e)
    }

    /// Translate a `VirtualAddress` to `PhysicalAddress` if mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (frame, _) = self.leaf(va)?.page_4k()?;
        Some(frame.join(va.offset()))
    }

    #[inline]
    #[must_use]
    pub fn is_mapped(&self, va: VirtualAddress) -> bool {
        self.leaf(va).is_some()
    }

    /// Tear down the user half (slots `0..768`).
    ///
    /// `on_leaf` receives every mapped page and its frame; `on_table` then
    /// receives each page table frame. All user directory entries end up cleared.
    pub fn release_user_half(
        &self,
        mut on_leaf: impl FnMut(VirtualPage, PhysicalPage),
        mut on_table: impl FnMut(PhysicalPage),
    ) {
        for slot in 0..KERNEL_SLOTS.start {
            let di = DirectoryIndex::new(slot);
            let Some(table) = self.directory_mut().get(di).next_table() else {
                continue;
            };
            for (ti, pte) in self.table_mut(table).present_entries() {
                let va = di.base() + ((ti.as_usize() as u32) << 12);
                if let Some((frame, _)) = pte.page_4k() {
                    on_leaf(VirtualPage::from_aligned(va), frame);
                }
            }
            self.table_mut(table).zero();
            self.directory_mut().set(di, PdEntry::zero());
            on_table(table);
        }
    }

    /// Number of user-half page tables currently linked.
    #[must_use]
    pub fn user_table_count(&self) -> usize {
        (0..KERNEL_SLOTS.start)
            .filter(|&s| self.directory_mut().get(DirectoryIndex::new(s)).is_present())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TableIndex;
    use crate::tests::{BumpAlloc, TestPhys};

    const KERNEL_ROOT: u32 = 1;

    fn kernel_space(phys: &TestPhys) -> AddressSpace<'_, TestPhys> {
        let aspace = AddressSpace::from_root(phys, PhysicalPage::from_number(KERNEL_ROOT));
        aspace.init_kernel();
        aspace
    }

    #[test]
    fn kernel_layout_prelinks_tables() {
        let phys = TestPhys::with_frames(300);
        let k = kernel_space(&phys);
        let dir = k.directory_mut();
        assert!(!dir.get(DirectoryIndex::new(0)).is_present());
        assert_eq!(
            dir.get(DirectoryIndex::new(768)).next_table(),
            Some(PhysicalPage::from_number(KERNEL_ROOT + 1))
        );
        assert_eq!(
            dir.get(DirectoryIndex::new(1022)).next_table(),
            Some(PhysicalPage::from_number(KERNEL_ROOT + 255))
        );
        assert_eq!(
            dir.get(DirectoryIndex::SELF_MAP).next_table(),
            Some(k.root_page())
        );
    }

    #[test]
    fn kernel_mapping_never_allocates() {
        let phys = TestPhys::with_frames(300);
        let k = kernel_space(&phys);
        let mut alloc = BumpAlloc::new(0, 0);

        let page = VirtualPage::from_aligned(VirtualAddress::new(0xC010_0000));
        k.map_one(&mut alloc, page, PhysicalPage::from_number(260), PageEntryBits::kernel_rw())
            .expect("map_one");
        assert_eq!(
            k.query(VirtualAddress::new(0xC010_0123)),
            Some(PhysicalAddress::new(260 * 4096 + 0x123))
        );
    }

    #[test]
    fn user_mapping_creates_table_lazily() {
        let phys = TestPhys::with_frames(300);
        let k = kernel_space(&phys);
        let p = AddressSpace::from_root(&phys, PhysicalPage::from_number(280));
        p.init_process(&k);
        let mut alloc = BumpAlloc::new(281, 2);

        let page = VirtualPage::from_aligned(VirtualAddress::new(0x0804_8000));
        p.map_one(&mut alloc, page, PhysicalPage::from_number(290), PageEntryBits::user_rw())
            .expect("map_one");
        assert_eq!(p.user_table_count(), 1);

        let pte = p.leaf(page.base()).expect("leaf");
        assert!(pte.flags().user_access());
        let pde = p.directory_mut().get(DirectoryIndex::new(32));
        assert_eq!(pde.next_table(), Some(PhysicalPage::from_number(281)));
        assert!(pde.flags().user_access());

        assert_eq!(
            p.map_one(&mut alloc, page, PhysicalPage::from_number(291), PageEntryBits::user_rw()),
            Err(MapError::AlreadyMapped(page.base()))
        );
    }

    #[test]
    fn mapping_lands_in_the_slot_named_by_the_address() {
        let phys = TestPhys::with_frames(300);
        let k = kernel_space(&phys);
        let mut none = BumpAlloc::new(0, 0);

        let va = VirtualAddress::new(0xC010_3000);
        k.map_one(&mut none, va.page(), PhysicalPage::from_number(265), PageEntryBits::kernel_rw())
            .expect("map_one");

        let (di, ti) = split_indices(va);
        assert_eq!(ti, TableIndex::new(0x103));
        let table = k.directory_mut().get(di).next_table().expect("kernel table");
        assert_eq!(
            k.table_mut(table).get(ti).page_4k().map(|(frame, _)| frame),
            Some(PhysicalPage::from_number(265))
        );
    }

    #[test]
    fn table_allocation_failure_is_reported() {
        let phys = TestPhys::with_frames(300);
        let k = kernel_space(&phys);
        let p = AddressSpace::from_root(&phys, PhysicalPage::from_number(280));
        p.init_process(&k);
        let mut empty = BumpAlloc::new(0, 0);

        let page = VirtualPage::from_aligned(VirtualAddress::new(0x0804_8000));
        assert_eq!(
            p.map_one(&mut empty, page, PhysicalPage::from_number(290), PageEntryBits::user_rw()),
            Err(MapError::OutOfMemory(page.base()))
        );
        assert_eq!(p.user_table_count(), 0);
    }

    #[test]
    fn kernel_half_is_shared() {
        let phys = TestPhys::with_frames(300);
        let k = kernel_space(&phys);
        let p = AddressSpace::from_root(&phys, PhysicalPage::from_number(280));
        p.init_process(&k);
        assert_eq!(
            p.directory_mut().get(DirectoryIndex::SELF_MAP).next_table(),
            Some(p.root_page())
        );

        let mut none = BumpAlloc::new(0, 0);
        let page = VirtualPage::from_aligned(VirtualAddress::new(0xC020_0000));
        k.map_one(&mut none, page, PhysicalPage::from_number(299), PageEntryBits::kernel_rw())
            .expect("map_one");
        assert_eq!(p.query(page.base()), k.query(page.base()));
    }

    #[test]
    fn unmap_returns_frame() {
        let phys = TestPhys::with_frames(300);
        let k = kernel_space(&phys);
        let mut none = BumpAlloc::new(0, 0);
        let page = VirtualPage::from_aligned(VirtualAddress::new(0xC010_1000));

        assert_eq!(k.unmap_one(page), Err(MapError::NotMapped(page.base())));
        k.map_one(&mut none, page, PhysicalPage::from_number(270), PageEntryBits::kernel_rw())
            .expect("map_one");
        assert_eq!(k.unmap_one(page), Ok(PhysicalPage::from_number(270)));
        assert!(!k.is_mapped(page.base()));
    }

    #[test]
    fn release_user_half_reports_everything() {
        let phys = TestPhys::with_frames(300);
        let k = kernel_space(&phys);
        let p = AddressSpace::from_root(&phys, PhysicalPage::from_number(280));
        p.init_process(&k);
        let mut alloc = BumpAlloc::new(281, 4);

        let low = VirtualPage::from_aligned(VirtualAddress::new(0x0804_8000));
        let high = VirtualPage::from_aligned(VirtualAddress::new(0xBFFF_F000));
        p.map_one(&mut alloc, low, PhysicalPage::from_number(290), PageEntryBits::user_rw())
            .expect("map low");
        p.map_one(&mut alloc, high, PhysicalPage::from_number(291), PageEntryBits::user_rw())
            .expect("map high");

        let mut leaves = Vec::new();
        let mut tables = Vec::new();
        p.release_user_half(|va, pa| leaves.push((va, pa)), |t| tables.push(t));

        assert_eq!(
            leaves,
            vec![
                (low, PhysicalPage::from_number(290)),
                (high, PhysicalPage::from_number(291))
            ]
        );
        assert_eq!(
            tables,
            vec![PhysicalPage::from_number(281), PhysicalPage::from_number(282)]
        );
        assert_eq!(p.user_table_count(), 0);
        assert!(p.directory_mut().get(DirectoryIndex::new(768)).is_present());
    }
}
