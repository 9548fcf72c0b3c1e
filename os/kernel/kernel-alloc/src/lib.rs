//! # Kernel Memory Allocation and Virtual Memory Management
//!
//! This crate provides the page- and byte-granular allocators of the kernel.
//! Nothing in here locks: every type works on `&mut self`, and the kernel
//! serializes access with its pool locks and interrupt guards.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Arena heap (SizeClasses)               │
//! │    • 7 size classes, 16 … 1024 bytes                │
//! │    • page-granular "large" allocations              │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ PageSource
//! ┌─────────────────▼───────────────────────────────────┐
//! │                Virtual Memory Manager (Vmm)         │
//! │    • all-or-nothing multi-page allocation           │
//! │    • map / unmap / translate / invalidate           │
//! └───────┬─────────────────────────────────┬───────────┘
//!         │                                 │
//! ┌───────▼─────────────────┐  ┌────────────▼───────────┐
//! │   VirtualPool (bitmap)  │  │  PhysicalPool (bitmap) │
//! │   kernel heap region or │  │  kernel or user frames │
//! │   one process's region  │  │                        │
//! └─────────────────────────┘  └────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Physical pools ([`phys_pool`])
//!
//! One bit per 4 KiB frame; frame = `base + index * 4096`. The kernel owns
//! two: the kernel pool (kernel pages and every page table) and the user pool
//! (process pages). Runs of adjacent frames can be taken for structures that
//! must be physically contiguous.
//!
//! ### Virtual pools ([`virt_pool`])
//!
//! One bit per page of a virtual region. The kernel heap region starts at
//! `0xC010_0000`; every process has its own pool over
//! `0x0804_8000..0xC000_0000`.
//!
//! ### Virtual Memory Manager ([`vmm`])
//!
//! Combines one address space, its virtual pool and its backing pools. A
//! failed multi-page request releases every frame and reservation it had
//! already taken.
//!
//! ### Heap ([`heap`])
//!
//! Splits single pages into blocks of one size class and hands out larger
//! requests as whole pages. The owning arena of a block is found by masking
//! the block address to its page.
//!
//! ### Physical Mapper ([`phys_mapper`])
//!
//! Reaches frames through the kernel's direct map of physical RAM.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod heap;
pub mod phys_mapper;
pub mod phys_pool;
pub mod virt_pool;
pub mod vmm;

#[cfg(test)]
mod test_support;

pub use heap::{ArenaInfo, HeapError, PageSource, SizeClasses};
pub use phys_pool::PhysicalPool;
pub use virt_pool::VirtualPool;
pub use vmm::{Vmm, VmmError};
