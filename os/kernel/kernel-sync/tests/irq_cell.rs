use kernel_sync::{InterruptControl, IrqCell, IrqGuard};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

/// An interrupt flag that only exists in memory.
#[derive(Default)]
struct FakeCpu {
    enabled: Cell<bool>,
    toggles: Cell<u32>,
}

impl FakeCpu {
    fn enabled() -> Self {
        let cpu = Self::default();
        cpu.enabled.set(true);
        cpu
    }
}

impl InterruptControl for FakeCpu {
    fn are_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn disable(&self) {
        self.toggles.set(self.toggles.get() + 1);
        self.enabled.set(false);
    }

    fn enable(&self) {
        self.toggles.set(self.toggles.get() + 1);
        self.enabled.set(true);
    }
}

#[test]
fn guard_disables_and_restores() {
    let cpu = FakeCpu::enabled();
    {
        let g = IrqGuard::new(&cpu);
        assert!(g.were_enabled());
        assert!(!cpu.are_enabled());
    }
    assert!(cpu.are_enabled());
    assert_eq!(cpu.toggles.get(), 2);
}

#[test]
fn nested_guards_restore_outermost_state() {
    let cpu = FakeCpu::enabled();
    {
        let _outer = IrqGuard::new(&cpu);
        {
            let inner = IrqGuard::new(&cpu);
            assert!(!inner.were_enabled());
        }
        assert!(!cpu.are_enabled(), "inner guard must not re-enable");
    }
    assert!(cpu.are_enabled());
}

#[test]
fn guard_leaves_disabled_state_alone() {
    let cpu = FakeCpu::default();
    {
        let _g = IrqGuard::new(&cpu);
    }
    assert!(!cpu.are_enabled());
    assert_eq!(cpu.toggles.get(), 0);
}

#[test]
fn borrow_and_mutate() {
    let cpu = FakeCpu::enabled();
    let cell = IrqCell::new(41_u32);
    {
        let g = IrqGuard::new(&cpu);
        *cell.borrow(&g) += 1;
        assert_eq!(cell.with(&g, |v| *v), 42);
    }
    assert_eq!(cell.into_inner(), 42);
}

#[test]
fn second_borrow_panics_and_first_survives() {
    let cpu = FakeCpu::enabled();
    let cell = IrqCell::new(vec![1, 2, 3]);
    let g = IrqGuard::new(&cpu);
    let first = cell.borrow(&g);

    let r = panic::catch_unwind(AssertUnwindSafe(|| {
        let _second = cell.borrow(&g);
    }));
    assert!(r.is_err());
    assert_eq!(first.len(), 3);
    drop(first);

    // released again
    cell.with(&g, |v| v.push(4));
    assert_eq!(cell.borrow(&g).len(), 4);
}

#[test]
fn get_mut_needs_no_guard() {
    let mut cell = IrqCell::new(String::from("a"));
    cell.get_mut().push('b');
    assert_eq!(cell.into_inner(), "ab");
}
