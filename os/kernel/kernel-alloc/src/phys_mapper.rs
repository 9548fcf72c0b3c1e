//! # Direct-map `PhysMapper` for kernel virtual memory
//!
//! The kernel maps physical RAM linearly at [`DIRECT_MAP_BASE`], so a frame's
//! bytes are reachable at `DIRECT_MAP_BASE + pa` from every address space
//! (the mapping lives in the shared kernel half).
//!
//! ## Why is this needed?
//! - Code can only dereference virtual addresses, not physical ones.
//! - Page tables, fresh frames and process bitmaps are edited by physical
//!   address, often while a different address space is active.
//!
//! ## See also
//! - [`PhysMapper`] trait in `kernel-vmem`
//! - `kernel_info::memory` for the layout constants

use kernel_info::memory::{DIRECT_MAP_BASE, DIRECT_MAP_LIMIT};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] implementation over the kernel's direct map.
///
/// # Safety
/// - The direct map must be present and cover the referenced physical range.
/// - Only RAM below [`DIRECT_MAP_LIMIT`] is reachable.
#[derive(Copy, Clone, Debug, Default)]
pub struct DirectPhysMapper;

impl DirectPhysMapper {
    /// The virtual address through which `pa` is reachable.
    #[inline]
    #[must_use]
    pub const fn virt(pa: PhysicalAddress) -> usize {
        debug_assert!(pa.as_u32() < DIRECT_MAP_LIMIT);
        (DIRECT_MAP_BASE.as_u32() + pa.as_u32()) as usize
    }
}

impl PhysMapper for DirectPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = Self::virt(pa) as *mut T;
        // SAFETY: Caller must ensure the physical address is valid and direct-mapped.
        unsafe { &mut *va }
    }
}
