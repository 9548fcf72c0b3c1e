//! Bitmap-backed physical frame pools.

use kernel_collections::Bitmap;
use kernel_info::memory::PoolLayout;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};
use kernel_vmem::FrameAlloc;

/// A contiguous range of physical frames handed out one bit at a time.
///
/// Bit `i` set means the frame at `base + i * 4096` is in use.
pub struct PhysicalPool<'a> {
    name: &'static str,
    base: PhysicalAddress,
    bitmap: Bitmap<'a>,
}

impl<'a> PhysicalPool<'a> {
    /// Create an all-free pool over `layout`, storing its bitmap in `storage`.
    ///
    /// ### Panics
    /// If `storage` is shorter than [`PoolLayout::bitmap_bytes`], or the
    /// pool reaches past the 32-bit physical address space.
    pub fn new(name: &'static str, layout: PoolLayout, storage: &'a mut [u8]) -> Self {
        debug_assert!(layout.base.is_page_aligned());
        assert!(
            u64::from(layout.base.as_u32()) + u64::from(layout.pages) * u64::from(PAGE_SIZE) <= 1 << 32,
            "{name} pool of {} frames at {} exceeds 4 GiB",
            layout.pages,
            layout.base
        );
        Self {
            name,
            base: layout.base,
            bitmap: Bitmap::new(storage, layout.pages as usize),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    #[must_use]
    pub const fn total_pages(&self) -> usize {
        self.bitmap.len()
    }

    #[must_use]
    pub fn used_pages(&self) -> usize {
        self.bitmap.count_used()
    }

    #[must_use]
    pub fn free_pages(&self) -> usize {
        self.total_pages() - self.used_pages()
    }

    /// The occupancy bitmap, one bit per frame.
    #[must_use]
    pub const fn bitmap(&self) -> &Bitmap<'a> {
        &self.bitmap
    }

    /// Whether `page` belongs to this pool.
    #[must_use]
    pub fn contains(&self, page: PhysicalPage) -> bool {
        self.index_of(page).is_some()
    }

    fn index_of(&self, page: PhysicalPage) -> Option<usize> {
        let base = self.base.as_u32();
        let addr = page.base().as_u32();
        if addr < base {
            return None;
        }
        let index = ((addr - base) / PAGE_SIZE) as usize;
        (index < self.bitmap.len()).then_some(index)
    }

    // Indices are below `layout.pages`, a u32.
    #[allow(clippy::cast_possible_truncation)]
    fn page_at(&self, index: usize) -> PhysicalPage {
        PhysicalPage::from_aligned(self.base + index as u32 * PAGE_SIZE)
    }

    /// Take one free frame.
    pub fn allocate_frame(&mut self) -> Option<PhysicalPage> {
        self.allocate_contiguous(1)
    }

    /// Take `count` physically adjacent frames and return the first.
    pub fn allocate_contiguous(&mut self, count: usize) -> Option<PhysicalPage> {
        let Some(index) = self.bitmap.alloc(count) else {
            log::warn!("{} pool: no run of {count} free frames", self.name);
            return None;
        };
        self.bitmap.set_range(index, count, true);
        Some(self.page_at(index))
    }

    /// Return one frame to the pool.
    ///
    /// ### Panics
    /// If `page` is outside the pool or not allocated.
    pub fn free_frame(&mut self, page: PhysicalPage) {
        self.free_contiguous(page, 1);
    }

    /// Return `count` frames starting at `first`.
    ///
    /// ### Panics
    /// If any frame is outside the pool or not allocated.
    pub fn free_contiguous(&mut self, first: PhysicalPage, count: usize) {
        let Some(start) = self.index_of(first) else {
            panic!("{} pool: {first} does not belong to this pool", self.name);
        };
        assert!(
            start + count <= self.bitmap.len(),
            "{} pool: freeing past the end",
            self.name
        );
        for index in start..start + count {
            assert!(
                self.bitmap.test(index),
                "{} pool: double free of {}",
                self.name,
                self.page_at(index)
            );
            self.bitmap.set(index, false);
        }
    }
}

impl FrameAlloc for PhysicalPool<'_> {
    #[inline]
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        self.allocate_frame()
    }
}

impl core::fmt::Debug for PhysicalPool<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PhysicalPool")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("pages", &self.total_pages())
            .field("used", &self.used_pages())
            .finish()
    }
}
