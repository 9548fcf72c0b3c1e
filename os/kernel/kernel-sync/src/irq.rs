use core::marker::PhantomData;

/// Access to the CPU's interrupt-enable flag.
///
/// # Safety & Privilege
///
/// Hardware implementations must only be used where `cli`/`sti` are legal
/// (ring 0). The kernel consumes this trait; it never issues the
/// instructions itself.
pub trait InterruptControl {
    /// Whether maskable interrupts are currently delivered.
    fn are_enabled(&self) -> bool;

    /// Stop delivering maskable interrupts.
    fn disable(&self);

    /// Resume delivering maskable interrupts.
    fn enable(&self);

    /// Restore a state previously read with [`are_enabled`](Self::are_enabled).
    #[inline]
    fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.enable();
        } else {
            self.disable();
        }
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the interrupt state. If interrupts were
/// enabled, it disables them. On drop, it re-enables them **only** if they
/// were previously enabled, so guards nest.
///
/// The guard is tied to the execution context that created it and is
/// neither `Send` nor `Sync`.
///
/// # Examples
///
/// ```
/// use core::cell::Cell;
/// use kernel_sync::{InterruptControl, IrqGuard};
///
/// struct Flag(Cell<bool>);
///
/// impl InterruptControl for Flag {
///     fn are_enabled(&self) -> bool { self.0.get() }
///     fn disable(&self) { self.0.set(false) }
///     fn enable(&self) { self.0.set(true) }
/// }
///
/// let cpu = Flag(Cell::new(true));
/// {
///     let _outer = IrqGuard::new(&cpu);
///     {
///         let _inner = IrqGuard::new(&cpu);
///     }
///     assert!(!cpu.are_enabled()); // inner guard found them disabled
/// }
/// assert!(cpu.are_enabled());
/// ```
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct IrqGuard<'a, I: InterruptControl + ?Sized> {
    irq: &'a I,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a, I: InterruptControl + ?Sized> IrqGuard<'a, I> {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    pub fn new(irq: &'a I) -> Self {
        let enabled = irq.are_enabled();
        if enabled {
            irq.disable();
        }
        Self {
            irq,
            were_enabled: enabled,
            _not_send: PhantomData,
        }
    }

    /// Whether interrupts were enabled before this guard.
    #[inline]
    #[must_use]
    pub const fn were_enabled(&self) -> bool {
        self.were_enabled
    }

    /// The interrupt controller this guard acts on.
    #[inline]
    #[must_use]
    pub const fn control(&self) -> &'a I {
        self.irq
    }
}

impl<I: InterruptControl + ?Sized> Drop for IrqGuard<'_, I> {
    /// Re-enables interrupts only if they were previously enabled.
    fn drop(&mut self) {
        if self.were_enabled {
            self.irq.enable();
        }
    }
}

/// The interrupt flag of the executing x86 CPU.
///
/// # Platform / Privilege
///
/// Uses `cli`/`sti` and `pushf`/`pop`; requires ring 0.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[derive(Copy, Clone, Debug, Default)]
pub struct X86Interrupts;

/// `IF`, bit 9 of `EFLAGS`.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
const EFLAGS_IF: usize = 1 << 9;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
impl X86Interrupts {
    /// Returns the current `EFLAGS` value.
    #[inline]
    #[must_use]
    pub fn eflags() -> usize {
        let r: usize;
        #[cfg(target_arch = "x86")]
        unsafe {
            core::arch::asm!("pushfd; pop {}", out(reg) r, options(nomem, preserves_flags));
        }
        #[cfg(target_arch = "x86_64")]
        unsafe {
            core::arch::asm!("pushfq; pop {}", out(reg) r, options(nomem, preserves_flags));
        }
        r
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
impl InterruptControl for X86Interrupts {
    #[inline]
    fn are_enabled(&self) -> bool {
        Self::eflags() & EFLAGS_IF != 0
    }

    #[inline]
    fn disable(&self) {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    fn enable(&self) {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }
}
