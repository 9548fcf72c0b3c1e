//! # Memory Layout

use crate::boot::MAX_SUPPORTED_MEMORY;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};

/// Start of the kernel half; every address space shares the tables above it.
pub const KERNEL_SPACE_START: VirtualAddress = VirtualAddress::new(0xC000_0000);

/// First page directory entry of the kernel half.
pub const KERNEL_DIRECTORY_START: usize = 768;

/// Start of the kernel heap, i.e. the base of the kernel virtual pool.
pub const KERNEL_HEAP_START: VirtualAddress = VirtualAddress::new(0xC010_0000);

/// Lowest address handed out by a process's user virtual pool.
pub const USER_VADDR_START: VirtualAddress = VirtualAddress::new(0x0804_8000);

/// End (exclusive) of the user virtual region.
pub const USER_VADDR_END: VirtualAddress = KERNEL_SPACE_START;

/// Where the page directory maps itself (last directory entry).
pub const SELF_MAP_BASE: VirtualAddress = VirtualAddress::new(0xFFC0_0000);

/// Physical frame of the kernel page directory, placed by the loader.
pub const KERNEL_PAGE_DIRECTORY: PhysicalAddress = PhysicalAddress::new(0x0010_0000);

/// Kernel page tables following the directory: one shared by directory
/// entries 0 and 768, then one for each of the entries 769..1023.
pub const KERNEL_PAGE_TABLES: u32 = 255;

/// Physical memory not managed by the pools: the first MiB, the kernel
/// directory and the kernel page tables.
pub const RESERVED_LOW_MEMORY: u32 =
    KERNEL_PAGE_DIRECTORY.as_u32() + (KERNEL_PAGE_TABLES + 1) * PAGE_SIZE;

/// Base of the direct mapping of physical memory used to reach frames
/// (page tables, arena headers) by physical address.
pub const DIRECT_MAP_BASE: VirtualAddress = VirtualAddress::new(0xE000_0000);

/// Highest RAM size covered by [`DIRECT_MAP_BASE`].
pub const DIRECT_MAP_LIMIT: u32 = SELF_MAP_BASE.as_u32() - DIRECT_MAP_BASE.as_u32();

/// Number of pages in the user virtual region.
pub const USER_VADDR_PAGES: u32 =
    (USER_VADDR_END.as_u32() - USER_VADDR_START.as_u32()) / PAGE_SIZE;

const _: () = {
    assert!(KERNEL_HEAP_START.as_u32() > KERNEL_SPACE_START.as_u32());
    assert!(KERNEL_SPACE_START.as_u32() >> 22 == KERNEL_DIRECTORY_START as u32);
    assert!(USER_VADDR_START.as_u32() < USER_VADDR_END.as_u32());
    assert!(RESERVED_LOW_MEMORY == 0x0020_0000);
    assert!(DIRECT_MAP_BASE.as_u32() > KERNEL_HEAP_START.as_u32());
};

/// A run of physical frames managed by one pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PoolLayout {
    pub base: PhysicalAddress,
    pub pages: u32,
}

/// A run of virtual pages managed by one virtual pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegionLayout {
    pub base: VirtualAddress,
    pub pages: u32,
}

impl PoolLayout {
    /// Bytes of bitmap needed to track the pool.
    #[must_use]
    pub const fn bitmap_bytes(&self) -> usize {
        self.pages.div_ceil(8) as usize
    }

    /// End (exclusive) of the pool.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_u32() + self.pages * PAGE_SIZE)
    }
}

impl RegionLayout {
    #[must_use]
    pub const fn bitmap_bytes(&self) -> usize {
        self.pages.div_ceil(8) as usize
    }

    /// End (exclusive) of the region.
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(self.base.as_u32() + self.pages * PAGE_SIZE)
    }
}

/// Split of physical memory into the kernel and user pools, and the kernel
/// heap region tracking the kernel pool.
///
/// ```rust
/// # use kernel_info::memory::MemoryLayout;
/// let layout = MemoryLayout::from_total_memory(32 * 1024 * 1024);
/// assert_eq!(layout.kernel_pool.base.as_u32(), 0x0020_0000);
/// assert_eq!(layout.kernel_pool.pages, 3840);
/// assert_eq!(layout.user_pool.pages, 3840);
/// assert_eq!(layout.kernel_heap.pages, layout.kernel_pool.pages);
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryLayout {
    pub total_memory: u32,
    pub kernel_pool: PoolLayout,
    pub user_pool: PoolLayout,
    pub kernel_heap: RegionLayout,
}

impl MemoryLayout {
    /// Split the frames above [`RESERVED_LOW_MEMORY`] in half: the lower
    /// half goes to the kernel pool, the rest to the user pool.
    ///
    /// RAM beyond [`MAX_SUPPORTED_MEMORY`] is left unused.
    #[must_use]
    pub const fn from_total_memory(total_memory: u32) -> Self {
        let total_memory = if total_memory > MAX_SUPPORTED_MEMORY {
            MAX_SUPPORTED_MEMORY
        } else {
            total_memory
        };
        let free = total_memory.saturating_sub(RESERVED_LOW_MEMORY);
        let free_pages = free / PAGE_SIZE;
        let kernel_pages = free_pages / 2;
        Self::with_split(total_memory, kernel_pages, free_pages - kernel_pages)
    }

    /// Override the pool sizes, keeping both pools right above the reserved
    /// low memory.
    ///
    /// ### Panics
    /// If the pools do not fit into the detected memory.
    #[must_use]
    pub const fn with_pool_pages(self, kernel_pages: u32, user_pages: u32) -> Self {
        assert!(
            RESERVED_LOW_MEMORY + (kernel_pages + user_pages) * PAGE_SIZE <= self.total_memory,
            "pools exceed physical memory"
        );
        Self::with_split(self.total_memory, kernel_pages, user_pages)
    }

    const fn with_split(total_memory: u32, kernel_pages: u32, user_pages: u32) -> Self {
        let kernel_pool = PoolLayout {
            base: PhysicalAddress::new(RESERVED_LOW_MEMORY),
            pages: kernel_pages,
        };
        let user_pool = PoolLayout {
            base: kernel_pool.end(),
            pages: user_pages,
        };
        Self {
            total_memory,
            kernel_pool,
            user_pool,
            kernel_heap: RegionLayout {
                base: KERNEL_HEAP_START,
                pages: kernel_pages,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_the_free_frames() {
        let layout = MemoryLayout::from_total_memory(8 * 1024 * 1024);
        assert_eq!(layout.kernel_pool.pages, 768);
        assert_eq!(layout.user_pool.pages, 768);
        assert_eq!(layout.user_pool.base, layout.kernel_pool.end());
    }

    #[test]
    fn odd_frame_goes_to_the_user_pool() {
        let layout = MemoryLayout::from_total_memory(RESERVED_LOW_MEMORY + 3 * PAGE_SIZE);
        assert_eq!(layout.kernel_pool.pages, 1);
        assert_eq!(layout.user_pool.pages, 2);
    }

    #[test]
    fn explicit_split() {
        let layout = MemoryLayout::from_total_memory(8 * 1024 * 1024).with_pool_pages(4, 4);
        assert_eq!(layout.kernel_pool.pages, 4);
        assert_eq!(layout.kernel_heap.pages, 4);
        assert_eq!(layout.user_pool.base.as_u32(), RESERVED_LOW_MEMORY + 4 * PAGE_SIZE);
        assert_eq!(layout.kernel_pool.bitmap_bytes(), 1);
    }

    #[test]
    fn memory_above_the_supported_size_is_ignored() {
        let layout = MemoryLayout::from_total_memory(u32::MAX);
        assert_eq!(layout, MemoryLayout::from_total_memory(MAX_SUPPORTED_MEMORY));
        assert_eq!(layout.total_memory, MAX_SUPPORTED_MEMORY);
        assert!(layout.user_pool.end().as_u32() <= DIRECT_MAP_LIMIT);
        assert!(layout.kernel_heap.end().as_u32() <= DIRECT_MAP_BASE.as_u32());
    }

    #[test]
    fn tiny_machine_has_empty_pools() {
        let layout = MemoryLayout::from_total_memory(1024 * 1024);
        assert_eq!(layout.kernel_pool.pages, 0);
        assert_eq!(layout.user_pool.pages, 0);
    }
}
