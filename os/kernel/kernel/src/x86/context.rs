//! Saved thread state and the stack switch.
//!
//! A thread off the CPU is nothing but its stack pointer. The stack holds
//! the callee-saved registers pushed by [`switch_stacks`] and, above them,
//! the return address the switch resumes at:
//!
//! ```text
//!  high   ┌──────────────┐
//!         │ arg          │  entry's first argument (cdecl)
//!         │ 0            │  entry's return address (never used)
//!         │ entry        │  popped by `ret`
//!         │ ebp          │
//!         │ ebx          │
//!         │ esi          │
//!  esp →  │ edi          │
//!  low    └──────────────┘
//! ```
//!
//! A fresh context gets the same layout with zeroed registers, so the
//! first switch to it "returns" into `entry(arg)`.

use crate::arch::ContextEntry;
use kernel_memory_addresses::VirtualAddress;

/// Words in the frame of a context that has never run.
const INITIAL_FRAME_WORDS: usize = 7;

#[repr(C)]
#[derive(Debug, Default)]
pub struct X86Context {
    esp: usize,
}

impl X86Context {
    /// Lay out the initial frame below `stack_top`.
    ///
    /// # Safety
    /// The [`INITIAL_FRAME_WORDS`] words below `stack_top` must be mapped
    /// and unused.
    pub(super) unsafe fn prepare(&mut self, stack_top: VirtualAddress, entry: ContextEntry, arg: usize) {
        let frame: [usize; INITIAL_FRAME_WORDS] = [0, 0, 0, 0, entry as usize, 0, arg];
        let base = stack_top.as_usize() - size_of_val(&frame);
        unsafe { (base as *mut [usize; INITIAL_FRAME_WORDS]).write(frame) };
        self.esp = base;
    }
}

/// Save the callee-saved registers and `esp` into `previous`, then resume
/// `next`.
///
/// # Safety
/// Interrupts disabled; `next` prepared or saved by an earlier switch.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn switch_stacks(previous: *mut X86Context, next: *const X86Context) {
    core::arch::naked_asm!(
        "push ebp",
        "push ebx",
        "push esi",
        "push edi",
        // Four pushes plus the return address sit above the arguments.
        "mov eax, [esp + 20]",
        "mov edx, [esp + 24]",
        "mov [eax], esp",
        "mov esp, [edx]",
        "pop edi",
        "pop esi",
        "pop ebx",
        "pop ebp",
        "ret",
    );
}
