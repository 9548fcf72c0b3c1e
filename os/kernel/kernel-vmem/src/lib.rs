//! # Virtual Memory Support
//!
//! Two-level 32-bit x86 paging helpers for the kernel.
//!
//! ## What you get
//! - An [`address space`](address_space) describing a page directory root.
//! - Typed [`PageDirectory`]/[`PageTable`] frames with index helpers.
//! - The raw [`PageEntryBits`] shared by both levels.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//!
//! ## x86 Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |   PD  |   PT  | Offset |
//! ```
//!
//! The CPU uses the two upper fields as **indices** into two levels of
//! tables, each holding 1024 (2¹⁰) entries of 4 bytes.
//!
//! ```text
//!  CR3 → PD  →  PT  →  Physical Page
//!        │      │
//!        │      └───► PTE (Page Table Entry)     → maps 4 KiB page
//!        └──────────► PDE (Page Directory Entry) → points at a PT
//! ```
//!
//! ### Kernel half and self-map
//!
//! Directory slots `768..1023` cover `0xC000_0000..0xFFC0_0000`. Their page
//! tables are created once by the loader and shared verbatim by every
//! process directory, so a kernel mapping made in any address space is seen
//! by all of them. Slot 1023 points back at the directory itself, which
//! makes every page table addressable at `0xFFC0_0000 + PD·4096` and the
//! directory at `0xFFFF_F000`.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
mod page_entry_bits;
mod page_table;

pub use crate::address_space::AddressSpace;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::pd::{DirectoryIndex, PageDirectory, PdEntry};
pub use crate::page_table::pt::{PageTable, PtEntry, TableIndex};
pub use crate::page_table::split_indices;
use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage,
};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Errors from editing a page directory tree.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    /// No frame was available for a missing page table.
    #[error("out of memory allocating a page table for {0}")]
    OutOfMemory(VirtualAddress),
    /// The target page already has a present PTE.
    #[error("{0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    /// The target page has no present PTE.
    #[error("{0} is not mapped")]
    NotMapped(VirtualAddress),
}

/// Minimal frame allocator used to obtain **physical** 4 KiB frames
/// for page tables.
///
/// Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame.
    fn alloc_4k(&mut self) -> Option<PhysicalPage>;
}

/// Drops cached translations after a mapping changed.
///
/// Only the active address space is cached; invalidating a page of an
/// inactive space is harmless.
pub trait TlbInvalidate {
    /// Invalidate the cached translation of `page` (`invlpg`).
    fn invalidate_page(&self, page: VirtualPage);
}

/// Converts physical addresses to *temporarily* usable references in the
/// current virtual address space (e.g., via a direct map of physical RAM).
///
/// Implementations must map physically contiguous frames to virtually
/// contiguous memory; [`phys_to_slice_mut`](Self::phys_to_slice_mut) relies on it.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped as writable for `&mut T` and stay mapped for `'a`.
    /// - Type `T` must match the bytes at `pa`, and the caller must not
    ///   create overlapping live references.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// View `len` bytes of physically contiguous memory starting at `pa`.
    ///
    /// # Safety
    /// Same contract as [`phys_to_mut`](Self::phys_to_mut) for every byte in range.
    unsafe fn phys_to_slice_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        let first: &'a mut u8 = unsafe { self.phys_to_mut(pa) };
        unsafe { core::slice::from_raw_parts_mut(core::ptr::from_mut(first), len) }
    }
}

/// Typed frame accessors on top of any [`PhysMapper`].
pub trait PhysMapperExt: PhysMapper {
    /// Borrow the page directory in `page`.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn directory_mut(&self, page: PhysicalPage) -> &mut PageDirectory {
        unsafe { self.phys_to_mut::<PageDirectory>(page.base()) }
    }

    /// Borrow the page table in `page`.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn table_mut(&self, page: PhysicalPage) -> &mut PageTable {
        unsafe { self.phys_to_mut::<PageTable>(page.base()) }
    }

    /// Borrow the raw bytes of the frame in `page`.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn frame_mut(&self, page: PhysicalPage) -> &mut [u8; PAGE_SIZE as usize] {
        unsafe { self.phys_to_mut::<[u8; PAGE_SIZE as usize]>(page.base()) }
    }

    /// Fill the frame in `page` with zeroes.
    #[inline]
    fn zero_frame(&self, page: PhysicalPage) {
        self.frame_mut(page).fill(0);
    }
}

impl<M: PhysMapper + ?Sized> PhysMapperExt for M {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A trivial **bump** allocator: always hands out the next 4 KiB frame.
    pub struct BumpAlloc {
        next: u32,
        end: u32,
    }

    impl BumpAlloc {
        pub fn new(first_frame: u32, frames: u32) -> Self {
            Self {
                next: first_frame,
                end: first_frame + frames,
            }
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn alloc_4k(&mut self) -> Option<PhysicalPage> {
            if self.next >= self.end {
                return None;
            }
            let p = self.next;
            self.next += 1;
            Some(PhysicalPage::from_number(p))
        }
    }

    /// A 4 KiB-aligned raw frame. We use this as our "physical RAM" backing store in tests.
    #[repr(C, align(4096))]
    struct Aligned4K([u8; 4096]);

    /// A tiny in-memory "RAM": frame `n` lives at physical address `n * 4096`.
    pub struct TestPhys {
        frames: Box<[Aligned4K]>,
    }

    impl TestPhys {
        pub fn with_frames(n: usize) -> Self {
            let frames = (0..n).map(|_| Aligned4K([0; 4096])).collect();
            Self { frames }
        }
    }

    impl PhysMapper for TestPhys {
        unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
            let idx = pa.as_usize() >> 12;
            let off = pa.offset() as usize;
            assert!(idx < self.frames.len(), "{pa} outside test RAM");
            let base = self.frames.as_ptr().cast::<u8>().cast_mut();
            unsafe { &mut *base.add(idx * 4096 + off).cast::<T>() }
        }
    }

    #[test]
    fn slices_span_frames() {
        let phys = TestPhys::with_frames(4);
        let bytes = unsafe { phys.phys_to_slice_mut(PhysicalAddress::new(0x1FFE), 4) };
        bytes.copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(phys.frame_mut(PhysicalPage::from_number(1))[4094..], [1, 2]);
        assert_eq!(phys.frame_mut(PhysicalPage::from_number(2))[..2], [3, 4]);
    }
}
