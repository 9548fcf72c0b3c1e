//! # Kernel synchronization primitives
//!
//! The kernel runs on one CPU and has no hardware atomics to lean on: the
//! only source of concurrency is the timer interrupt preempting whatever
//! runs. Shared state is therefore protected by turning interrupts off.
//!
//! - [`InterruptControl`] is the seam to the interrupt layer (`cli`/`sti`
//!   and the `IF` flag on x86, a simulated flag in tests).
//! - [`IrqGuard`] disables interrupts for a scope and restores the previous
//!   state on drop.
//! - [`IrqCell`] holds shared state that can only be borrowed while an
//!   [`IrqGuard`] is alive, so "no shared state is touched with interrupts
//!   on" is checked by the borrow checker instead of by convention.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod irq_cell;

pub use irq::{InterruptControl, IrqGuard};
pub use irq_cell::{IrqCell, IrqCellGuard};

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use irq::X86Interrupts;
