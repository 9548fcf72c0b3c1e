//! Bitmap-backed virtual address pools.

use kernel_collections::Bitmap;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, VirtualPage};

/// Reservation state of a page-granular region of virtual address space.
///
/// A set bit means the page is reserved, whether or not it is mapped yet.
pub struct VirtualPool<'a> {
    base: VirtualAddress,
    bitmap: Bitmap<'a>,
}

impl<'a> VirtualPool<'a> {
    /// An all-free pool of `pages` pages from `base`.
    ///
    /// ### Panics
    /// If the pool reaches past the 32-bit address space.
    pub fn new(base: VirtualAddress, pages: usize, storage: &'a mut [u8]) -> Self {
        debug_assert!(base.is_page_aligned());
        assert!(
            u64::try_from(pages)
                .is_ok_and(|p| u64::from(base.as_u32()) + p * u64::from(PAGE_SIZE) <= 1 << 32),
            "virtual pool of {pages} pages at {base} exceeds 4 GiB"
        );
        Self {
            base,
            bitmap: Bitmap::new(storage, pages),
        }
    }

    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
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
    pub const fn bitmap(&self) -> &Bitmap<'a> {
        &self.bitmap
    }

    fn index_of(&self, page: VirtualPage) -> Option<usize> {
        let va = page.base();
        if va < self.base {
            return None;
        }
        let index = (va.distance_from(self.base) / PAGE_SIZE) as usize;
        (index < self.bitmap.len()).then_some(index)
    }

    #[must_use]
    pub fn contains(&self, page: VirtualPage) -> bool {
        self.index_of(page).is_some()
    }

    #[must_use]
    pub fn is_reserved(&self, page: VirtualPage) -> bool {
        self.index_of(page).is_some_and(|i| self.bitmap.test(i))
    }

    /// Every reserved page, lowest first.
    pub fn reserved_pages(&self) -> impl Iterator<Item = VirtualPage> + '_ {
        self.bitmap.iter_used().map(|index| self.page_at(index).page())
    }

    /// Reserve exactly the pages `other` has reserved.
    ///
    /// ### Panics
    /// If `other` covers a different region.
    pub fn copy_from(&mut self, other: &VirtualPool<'_>) {
        assert_eq!(self.base, other.base, "copying a pool at {}", other.base);
        self.bitmap.copy_from(&other.bitmap);
    }

    /// Reserve `count` adjacent pages, first fit.
    pub fn allocate(&mut self, count: usize) -> Option<VirtualAddress> {
        let index = self.bitmap.alloc(count)?;
        self.bitmap.set_range(index, count, true);
        Some(self.page_at(index))
    }

    // `new` keeps every index within the 32-bit address space.
    #[allow(clippy::cast_possible_truncation)]
    fn page_at(&self, index: usize) -> VirtualAddress {
        self.base + index as u32 * PAGE_SIZE
    }

    /// Reserve the specific page `page`.
    ///
    /// Returns `false` if it lies outside the pool or is already reserved.
    pub fn reserve(&mut self, page: VirtualPage) -> bool {
        match self.index_of(page) {
            Some(index) if !self.bitmap.test(index) => {
                self.bitmap.set(index, true);
                true
            }
            _ => false,
        }
    }

    /// Release `count` pages starting at `base`.
    ///
    /// ### Panics
    /// If a page is outside the pool or was not reserved.
    pub fn free(&mut self, base: VirtualAddress, count: usize) {
        let Some(start) = self.index_of(base.page()) else {
            panic!("{base} is outside the virtual pool at {}", self.base);
        };
        assert!(start + count <= self.bitmap.len(), "freeing past the end of the virtual pool");
        for index in start..start + count {
            assert!(self.bitmap.test(index), "virtual page {index} was not reserved");
            self.bitmap.set(index, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_adjacent_pages_first_fit() {
        let mut storage = [0u8; 1];
        let mut v = VirtualPool::new(VirtualAddress::new(0xC010_0000), 8, &mut storage);
        let a = v.allocate(2).unwrap();
        let b = v.allocate(3).unwrap();
        assert_eq!(a.as_u32(), 0xC010_0000);
        assert_eq!(b.as_u32(), 0xC010_2000);
        assert_eq!(v.allocate(4), None);

        v.free(a, 2);
        assert_eq!(v.allocate(1), Some(a));
        assert_eq!(v.used_pages(), 4);
    }

    #[test]
    fn reserve_specific_page() {
        let mut storage = [0u8; 1];
        let mut v = VirtualPool::new(VirtualAddress::new(0x0804_8000), 4, &mut storage);
        let page = VirtualPage::from_aligned(VirtualAddress::new(0x0804_A000));
        assert!(v.reserve(page));
        assert!(!v.reserve(page));
        assert!(v.is_reserved(page));
        assert!(!v.reserve(VirtualPage::from_aligned(VirtualAddress::new(0x0804_C000))));
        assert_eq!(v.allocate(3), None);
        assert_eq!(v.allocate(2).map(|a| a.as_u32()), Some(0x0804_8000));
    }

    #[test]
    fn copy_mirrors_reservations() {
        let base = VirtualAddress::new(0x0804_8000);
        let mut from = [0u8; 2];
        let mut parent = VirtualPool::new(base, 16, &mut from);
        parent.allocate(2).unwrap();
        assert!(parent.reserve(VirtualPage::from_aligned(base + 9 * PAGE_SIZE)));

        let mut to = [0u8; 2];
        let mut child = VirtualPool::new(base, 16, &mut to);
        child.copy_from(&parent);
        let pages: Vec<u32> = child.reserved_pages().map(|p| p.base().as_u32()).collect();
        assert_eq!(pages, [0x0804_8000, 0x0804_9000, 0x0805_1000]);
        assert_eq!(child.allocate(1).map(|a| a.as_u32()), Some(0x0804_A000));
        assert_eq!(parent.used_pages(), 3);
    }

    #[test]
    fn pool_may_end_at_the_top_of_the_address_space() {
        let mut storage = [0u8; 1];
        let mut v = VirtualPool::new(VirtualAddress::new(0xFFFF_C000), 4, &mut storage);
        assert!(v.reserve(VirtualPage::from_aligned(VirtualAddress::new(0xFFFF_C000))));
        assert_eq!(v.allocate(3).map(|a| a.as_u32()), Some(0xFFFF_D000));
        assert_eq!(v.allocate(1), None);
    }

    #[test]
    #[should_panic(expected = "exceeds 4 GiB")]
    fn pool_past_the_address_space_is_rejected() {
        let mut storage = [0u8; 1];
        let _ = VirtualPool::new(VirtualAddress::new(0xFFFF_C000), 5, &mut storage);
    }
}
