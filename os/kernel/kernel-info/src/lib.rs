//! # Kernel Configuration and Boot Interface
//!
//! This crate is the single source of truth for the constants that the
//! bootstrap loader, the memory manager and the scheduler must agree on.
//!
//! ## Overview
//!
//! The kernel runs on a single 32-bit x86 CPU with two-level paging. The
//! loader enables paging before handing over, places the kernel page
//! directory and the kernel page tables right above the first MiB, stores
//! the detected RAM size at a fixed low address and reserves room for the
//! pool bitmaps. Everything the kernel derives from that handoff is
//! described here.
//!
//! ### Boot Information ([`boot`])
//! * **Total memory**: where the loader leaves the detected RAM size
//! * **Bitmap region**: the low-memory area holding the pool bitmaps
//! * **Boot stack**: the stack the `main` thread keeps running on
//!
//! ### Memory Layout ([`memory`])
//! * **Address space split**: user space below 3 GiB, kernel above
//! * **Reserved low memory**: first MiB, page directory and kernel tables
//! * **Pool layout**: [`MemoryLayout`](memory::MemoryLayout) splits the
//!   remaining frames between the kernel and the user pool
//!
//! ### Scheduling ([`sched`])
//! * Thread table capacity, priorities of `main` and `idle`
//! * Stack guard value and timer frequency
//!
//! ## Virtual Memory Architecture
//!
//! ```text
//! Virtual Address Space Layout (32-bit):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │         (unused)                │
//! 0x0804_8000 ├─────────────────────────────────┤ USER_VADDR_START
//!             │   User Space (per process)      │
//!             │   private page tables           │
//! 0xC000_0000 ├─────────────────────────────────┤ KERNEL_SPACE_START
//!             │   Low MiB, kernel image         │
//! 0xC010_0000 ├─────────────────────────────────┤ KERNEL_HEAP_START
//!             │   Kernel heap (kernel pool)     │
//!             │   tables shared by every space  │
//! 0xFFC0_0000 ├─────────────────────────────────┤ SELF_MAP_BASE
//!             │   Page directory self-map       │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod sched;
