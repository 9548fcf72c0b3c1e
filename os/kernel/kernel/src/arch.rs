//! # Architecture seam
//!
//! What the scheduler and the memory services consume from the layers below
//! them: the interrupt flag, physical memory access, TLB maintenance, the
//! raw context switch, address-space activation and the timer.
//!
//! The x86 implementation lives in [`crate::x86`]; the unit tests run the
//! kernel on a simulated CPU instead.

use kernel_memory_addresses::{PhysicalPage, VirtualAddress};
use kernel_sync::InterruptControl;
use kernel_vmem::{PhysMapper, TlbInvalidate};

/// Code entered by a prepared context or called on every timer tick.
///
/// The argument is the value handed in at registration.
pub type ContextEntry = extern "C" fn(usize);

pub trait Arch: InterruptControl + PhysMapper + TlbInvalidate + Sync + Sized + 'static {
    /// Saved execution state of a thread that is not on the CPU.
    type Context: Default + Send;

    /// Set up `context` so that switching to it calls `entry(arg)` on the
    /// stack ending at `stack_top`.
    fn prepare_context(
        &self,
        context: &mut Self::Context,
        stack_top: VirtualAddress,
        entry: ContextEntry,
        arg: usize,
    );

    /// Save the running thread into `previous` and resume `next`.
    ///
    /// Returns when a later switch resumes `previous`.
    ///
    /// # Safety
    /// - Interrupts must be disabled.
    /// - `next` must hold a prepared or previously saved context.
    /// - Both pointers must stay valid until the switch has happened.
    unsafe fn switch_context(&self, previous: *mut Self::Context, next: *const Self::Context);

    /// Load the page directory in `directory`.
    fn activate(&self, directory: PhysicalPage);

    /// Call `callback(context)` on every timer interrupt, with interrupts disabled.
    fn register_timer(&self, callback: ContextEntry, context: usize);

    /// Enable interrupts and wait for the next one.
    fn halt(&self);
}
