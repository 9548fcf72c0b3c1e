//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the 32-bit addresses and page bases used by
//! the paging, pool and heap code.
//!
//! ## Overview
//!
//! The kernel runs on a 32-bit x86 machine with two-level paging, so every
//! address fits into a `u32` and every page is 4 KiB. The types here exist to
//! keep virtual and physical values apart at compile time:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] / [`VirtualPage`] | Refer to page-table translated memory. |
//! | [`PhysicalAddress`] / [`PhysicalPage`] | Refer to RAM frames as seen by the MMU. |
//!
//! Page types always carry a 4 KiB aligned base; splitting an address yields
//! the page plus the in-page offset, joining reverses it.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xC010_1234);
//! let (page, offset) = va.split();
//! assert_eq!(page.base().as_u32(), 0xC010_1000);
//! assert_eq!(offset, 0x234);
//! assert_eq!(page.join(offset), va);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Size of a page and of a page frame in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// `log2(PAGE_SIZE)`, the number of offset bits in an address.
pub const PAGE_SHIFT: u32 = 12;

/// Mask selecting the in-page offset bits.
pub const PAGE_OFFSET_MASK: u32 = PAGE_SIZE - 1;

/// Number of pages needed to hold `bytes` bytes.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u32) -> u32 {
    bytes.div_ceil(PAGE_SIZE)
}
