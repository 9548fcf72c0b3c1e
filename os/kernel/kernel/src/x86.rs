//! # i386 backend
//!
//! [`X86`] implements [`Arch`] for a single 32-bit CPU:
//!
//! | Concern              | Mechanism                                      |
//! |----------------------|------------------------------------------------|
//! | interrupt flag       | `cli` / `sti` / `pushfd` via [`X86Interrupts`] |
//! | physical memory      | direct map at `DIRECT_MAP_BASE`                |
//! | TLB                  | `invlpg`                                       |
//! | address space        | `mov cr3`                                      |
//! | context switch       | [`context::switch_stacks`]                     |
//! | timer                | PIT counter 0, IRQ 0 → [`timer_irq`]           |
//!
//! The IDT and the PIC are set up by the interrupt layer, which calls
//! [`timer_irq`] for IRQ 0 with interrupts disabled.

mod context;
mod pit;

#[cfg(target_os = "none")]
mod boot;

pub use context::X86Context;

use crate::arch::{Arch, ContextEntry};
use kernel_alloc::phys_mapper::DirectPhysMapper;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use kernel_sync::{InterruptControl, IrqCell, IrqGuard, X86Interrupts};
use kernel_vmem::{PhysMapper, TlbInvalidate};

/// Callback and context registered through [`Arch::register_timer`].
static TIMER: IrqCell<Option<(ContextEntry, usize)>> = IrqCell::new(None);

/// Command port of the primary PIC.
const PIC1_COMMAND: u16 = 0x20;

/// Non-specific end of interrupt.
const PIC_EOI: u8 = 0x20;

/// The executing CPU.
#[derive(Copy, Clone, Debug, Default)]
pub struct X86;

impl InterruptControl for X86 {
    #[inline]
    fn are_enabled(&self) -> bool {
        X86Interrupts.are_enabled()
    }

    #[inline]
    fn disable(&self) {
        X86Interrupts.disable();
    }

    #[inline]
    fn enable(&self) {
        X86Interrupts.enable();
    }
}

impl PhysMapper for X86 {
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { DirectPhysMapper.phys_to_mut(pa) }
    }
}

impl TlbInvalidate for X86 {
    #[inline]
    fn invalidate_page(&self, page: VirtualPage) {
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) page.base().as_usize(), options(nostack, preserves_flags));
        }
    }
}

impl Arch for X86 {
    type Context = X86Context;

    fn prepare_context(
        &self,
        context: &mut X86Context,
        stack_top: VirtualAddress,
        entry: ContextEntry,
        arg: usize,
    ) {
        // SAFETY: `stack_top` ends a mapped, unused kernel stack page.
        unsafe { context.prepare(stack_top, entry, arg) };
    }

    unsafe fn switch_context(&self, previous: *mut X86Context, next: *const X86Context) {
        unsafe { context::switch_stacks(previous, next) };
    }

    fn activate(&self, directory: PhysicalPage) {
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) directory.base().as_usize(), options(nostack, preserves_flags));
        }
    }

    fn register_timer(&self, callback: ContextEntry, context: usize) {
        let irq = IrqGuard::new(self);
        *TIMER.borrow(&irq) = Some((callback, context));
        pit::start_periodic();
    }

    fn halt(&self) {
        unsafe { core::arch::asm!("sti", "hlt", options(nomem, nostack)) }
    }
}

/// IRQ 0 handler body, entered from the interrupt layer.
///
/// The PIC is acknowledged before the callback runs, since the callback
/// may switch to another thread and only return much later.
#[unsafe(no_mangle)]
pub extern "C" fn timer_irq() {
    unsafe { outb(PIC1_COMMAND, PIC_EOI) };

    let registered = {
        let irq = IrqGuard::new(&X86Interrupts);
        *TIMER.borrow(&irq)
    };
    if let Some((callback, context)) = registered {
        callback(context);
    }
}

/// Write one byte to an I/O port.
///
/// # Safety
/// Ring 0 only; the port must belong to a device expecting the write.
#[inline]
pub(crate) unsafe fn outb(port: u16, val: u8) {
    unsafe {
        core::arch::asm!("out dx, al", in("dx") port, in("al") val, options(nomem, nostack, preserves_flags));
    }
}
