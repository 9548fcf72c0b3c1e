use crate::{InterruptControl, IrqGuard};
use core::cell::{Cell, UnsafeCell};
use core::ops::{Deref, DerefMut};

/// Shared kernel state that is only reachable with interrupts disabled.
///
/// On a single CPU, disabling interrupts is the whole mutual exclusion
/// story: nothing else can run until they are enabled again. Borrowing
/// requires a live [`IrqGuard`], and the borrow cannot outlive it.
///
/// Borrows do not nest. A second borrow of the same cell while the first is
/// alive is a logic error and panics.
///
/// A borrow must never be held across a context switch; the next thread
/// would find the cell taken.
pub struct IrqCell<T> {
    borrowed: Cell<bool>,
    value: UnsafeCell<T>,
}

// Safety: every access goes through `borrow`, which requires interrupts to
// be off on the only CPU, and the `borrowed` flag rules out aliasing.
unsafe impl<T: Send> Sync for IrqCell<T> {}
unsafe impl<T: Send> Send for IrqCell<T> {}

impl<T> IrqCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            borrowed: Cell::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Borrow the value for as long as `guard` keeps interrupts off.
    ///
    /// ### Panics
    /// If the cell is already borrowed.
    #[inline]
    pub fn borrow<'g, I>(&'g self, guard: &'g IrqGuard<'_, I>) -> IrqCellGuard<'g, T>
    where
        I: InterruptControl + ?Sized,
    {
        debug_assert!(
            !guard.control().are_enabled(),
            "interrupts enabled under an IrqGuard"
        );
        assert!(!self.borrowed.replace(true), "IrqCell already borrowed");
        IrqCellGuard { cell: self }
    }

    /// Run `f` on the borrowed value.
    #[inline]
    pub fn with<I, R>(&self, guard: &IrqGuard<'_, I>, f: impl FnOnce(&mut T) -> R) -> R
    where
        I: InterruptControl + ?Sized,
    {
        let mut g = self.borrow(guard);
        f(&mut g)
    }

    /// Exclusive access needs no guard.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

/// Borrow of an [`IrqCell`], released on drop.
pub struct IrqCellGuard<'g, T> {
    cell: &'g IrqCell<T>,
}

impl<T> Deref for IrqCellGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.cell.value.get() }
    }
}

impl<T> DerefMut for IrqCellGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.cell.value.get() }
    }
}

impl<T> Drop for IrqCellGuard<'_, T> {
    fn drop(&mut self) {
        self.cell.borrowed.set(false);
    }
}
