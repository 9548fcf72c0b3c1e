//! # Kernel Boot Information

use crate::memory::{DIRECT_MAP_BASE, DIRECT_MAP_LIMIT, MemoryLayout};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};

/// Physical address at which the loader stores the detected RAM size (bytes, `u32`).
pub const TOTAL_MEMORY_ADDRESS: PhysicalAddress = PhysicalAddress::new(0xB00);

/// Virtual base of the low-memory region holding the pool bitmaps.
///
/// Four pages are reserved, which covers [`MAX_SUPPORTED_MEMORY`].
pub const MEMORY_BITMAP_BASE: VirtualAddress = VirtualAddress::new(0xC009_A000);

/// Number of pages reserved at [`MEMORY_BITMAP_BASE`].
pub const MEMORY_BITMAP_PAGES: u32 = 4;

/// Largest RAM size the pools cover. Its three pool bitmaps fit into the
/// bitmap region, and every pool frame lies inside the direct map.
pub const MAX_SUPPORTED_MEMORY: u32 = 320 * 1024 * 1024;

/// Base of the page the boot flow (later the `main` thread) runs on.
pub const BOOT_STACK_PAGE: VirtualAddress = VirtualAddress::new(0xC009_E000);

/// What the kernel learns from the loader.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BootInfo {
    /// Detected RAM in bytes.
    pub total_memory: u32,
}

impl BootInfo {
    #[must_use]
    pub const fn new(total_memory: u32) -> Self {
        Self { total_memory }
    }

    /// Whether the detected memory exceeds [`MAX_SUPPORTED_MEMORY`].
    #[must_use]
    pub const fn exceeds_supported_memory(&self) -> bool {
        self.total_memory > MAX_SUPPORTED_MEMORY
    }

    /// The pool layout derived from the detected memory.
    #[must_use]
    pub fn layout(&self) -> MemoryLayout {
        if self.exceeds_supported_memory() {
            log::warn!(
                "{} bytes of RAM detected, using only the first {MAX_SUPPORTED_MEMORY}",
                self.total_memory
            );
        }
        MemoryLayout::from_total_memory(self.total_memory)
    }
}

const _: () = {
    let layout = MemoryLayout::from_total_memory(MAX_SUPPORTED_MEMORY);
    let bytes = layout.kernel_pool.bitmap_bytes()
        + layout.user_pool.bitmap_bytes()
        + layout.kernel_heap.bitmap_bytes();
    assert!(bytes <= (MEMORY_BITMAP_PAGES * PAGE_SIZE) as usize);
    assert!(MAX_SUPPORTED_MEMORY <= DIRECT_MAP_LIMIT);
    assert!(layout.user_pool.end().as_u32() <= DIRECT_MAP_LIMIT);
    assert!(layout.kernel_heap.end().as_u32() <= DIRECT_MAP_BASE.as_u32());
    assert!(MEMORY_BITMAP_BASE.as_u32() + MEMORY_BITMAP_PAGES * PAGE_SIZE <= BOOT_STACK_PAGE.as_u32());
};

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u32 = 1024 * 1024;

    fn bitmap_bytes(layout: &MemoryLayout) -> usize {
        layout.kernel_pool.bitmap_bytes()
            + layout.user_pool.bitmap_bytes()
            + layout.kernel_heap.bitmap_bytes()
    }

    fn assert_fits(layout: &MemoryLayout) {
        assert!(bitmap_bytes(layout) <= (MEMORY_BITMAP_PAGES * PAGE_SIZE) as usize);
        assert!(layout.user_pool.end().as_u32() <= DIRECT_MAP_LIMIT);
        assert!(layout.kernel_heap.end().as_u32() <= DIRECT_MAP_BASE.as_u32());
    }

    #[test]
    fn supported_memory_is_used_in_full() {
        let info = BootInfo::new(64 * MIB);
        assert!(!info.exceeds_supported_memory());
        assert_eq!(info.layout().total_memory, 64 * MIB);
        assert_fits(&info.layout());
    }

    #[test]
    fn half_a_gigabyte_is_capped() {
        let info = BootInfo::new(512 * MIB);
        assert!(info.exceeds_supported_memory());
        let layout = info.layout();
        assert_eq!(layout.total_memory, MAX_SUPPORTED_MEMORY);
        assert_fits(&layout);
    }

    #[test]
    fn one_and_a_half_gigabytes_stay_clear_of_the_direct_map() {
        let layout = BootInfo::new(1536 * MIB).layout();
        assert_eq!(layout, BootInfo::new(MAX_SUPPORTED_MEMORY).layout());
        assert_fits(&layout);
    }
}
