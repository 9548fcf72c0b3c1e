//! # Scheduler Configuration

/// Capacity of the thread table.
pub const MAX_THREADS: usize = 64;

/// Bytes kept for a thread name, including the terminating zero.
pub const THREAD_NAME_LEN: usize = 16;

/// Priority (and thus time quantum) of the thread the boot flow turns into.
pub const MAIN_PRIORITY: u8 = 31;

/// Priority of the idle thread.
pub const IDLE_PRIORITY: u8 = 10;

/// Sentinel written to the lowest word of every kernel stack page.
pub const STACK_GUARD: u32 = 0x1994_0625;

/// Timer interrupts per second.
pub const TIMER_FREQUENCY_HZ: u32 = 100;

/// Input clock of the programmable interval timer.
pub const PIT_INPUT_FREQUENCY: u32 = 1_193_180;

/// Reload value for PIT counter 0.
pub const PIT_COUNTER0_VALUE: u16 = (PIT_INPUT_FREQUENCY / TIMER_FREQUENCY_HZ) as u16;

const _: () = {
    assert!(MAX_THREADS <= u16::MAX as usize);
    assert!(PIT_INPUT_FREQUENCY / TIMER_FREQUENCY_HZ <= u16::MAX as u32);
    assert!(IDLE_PRIORITY > 0 && MAIN_PRIORITY > 0);
};
