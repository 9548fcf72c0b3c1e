//! A simulated single CPU for the unit tests.
//!
//! Every kernel thread is backed by a host thread, and exactly one of them
//! holds the CPU at a time. A context switch hands the CPU to the next
//! thread and parks the previous one until it is switched to again. The
//! interrupt flag is a plain bit, and timer interrupts are raised by the
//! running thread itself through [`Sim::fire_timer`].
//!
//! Physical memory is a block of host memory: frame `n` is at physical
//! address `n * 4096`, and the kernel page directory and tables are laid out
//! the way the loader leaves them.

use crate::Kernel;
use crate::arch::{Arch, ContextEntry};
use core::ptr::{self, NonNull};
use kernel_info::memory::{KERNEL_PAGE_DIRECTORY, MemoryLayout};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use kernel_sync::InterruptControl;
use kernel_vmem::{AddressSpace, PhysMapper, TlbInvalidate};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Context of the thread that created the simulator (the test itself).
const BOOT: usize = 0;

#[repr(C, align(4096))]
struct Frame([u8; PAGE_SIZE as usize]);

#[derive(Debug, Default)]
pub struct SimContext {
    id: usize,
}

struct Cpu {
    running: usize,
    panic: Option<String>,
}

pub struct Sim {
    ram: NonNull<Frame>,
    frames: usize,
    interrupts: AtomicBool,
    cpu: Mutex<Cpu>,
    turn: Condvar,
    next_context: AtomicUsize,
    prepared: Mutex<HashMap<usize, (ContextEntry, usize)>>,
    timer: Mutex<Option<(ContextEntry, usize)>>,
    directory: AtomicU32,
    invalidations: AtomicUsize,
}

// SAFETY: RAM is only touched by the thread holding the CPU.
unsafe impl Send for Sim {}
unsafe impl Sync for Sim {}

impl Sim {
    /// RAM up to the end of the user pool, kernel directory in place.
    pub fn new(layout: &MemoryLayout) -> Self {
        let frames = (layout.user_pool.end().as_u32() / PAGE_SIZE) as usize;
        let ram: Box<[Frame]> = (0..frames).map(|_| Frame([0; PAGE_SIZE as usize])).collect();
        let sim = Self {
            ram: NonNull::from(Box::leak(ram)).cast(),
            frames,
            interrupts: AtomicBool::new(true),
            cpu: Mutex::new(Cpu {
                running: BOOT,
                panic: None,
            }),
            turn: Condvar::new(),
            next_context: AtomicUsize::new(BOOT + 1),
            prepared: Mutex::new(HashMap::new()),
            timer: Mutex::new(None),
            directory: AtomicU32::new(KERNEL_PAGE_DIRECTORY.page().number()),
            invalidations: AtomicUsize::new(0),
        };
        AddressSpace::from_root(&sim, KERNEL_PAGE_DIRECTORY.page()).init_kernel();
        sim
    }

    /// Raise a timer interrupt on the running thread.
    pub fn fire_timer(&self) {
        assert!(self.are_enabled(), "timer raised with interrupts disabled");
        let Some((callback, context)) = *self.timer.lock().unwrap() else {
            return;
        };
        self.disable();
        callback(context);
        self.enable();
    }

    /// The directory last loaded into the simulated CR3.
    pub fn active_directory(&self) -> PhysicalPage {
        PhysicalPage::from_number(self.directory.load(Ordering::SeqCst))
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    fn cpu(&self) -> MutexGuard<'_, Cpu> {
        self.cpu.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park until `id` holds the CPU. The test thread also wakes up to
    /// re-raise a panic of any simulated thread.
    fn wait_turn(&self, id: usize) {
        let mut cpu = self.cpu();
        loop {
            if cpu.running == id {
                return;
            }
            if id == BOOT
                && let Some(message) = cpu.panic.take()
            {
                drop(cpu);
                panic!("simulated thread panicked: {message}");
            }
            cpu = self.turn.wait(cpu).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn hand_over(&self, id: usize) {
        self.cpu().running = id;
        self.turn.notify_all();
    }

    fn poison(&self, payload: &(dyn Any + Send)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        self.cpu().panic = Some(message);
        self.turn.notify_all();
    }
}

impl InterruptControl for Sim {
    fn are_enabled(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst)
    }

    fn disable(&self) {
        self.interrupts.store(false, Ordering::SeqCst);
    }

    fn enable(&self) {
        self.interrupts.store(true, Ordering::SeqCst);
    }
}

impl PhysMapper for Sim {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let offset = pa.as_usize();
        assert!(
            offset + size_of::<T>() <= self.frames * PAGE_SIZE as usize,
            "{pa} outside simulated RAM"
        );
        unsafe { &mut *self.ram.as_ptr().cast::<u8>().add(offset).cast::<T>() }
    }
}

impl TlbInvalidate for Sim {
    fn invalidate_page(&self, _page: VirtualPage) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

impl Arch for Sim {
    type Context = SimContext;

    fn prepare_context(
        &self,
        context: &mut SimContext,
        _stack_top: VirtualAddress,
        entry: ContextEntry,
        arg: usize,
    ) {
        let id = self.next_context.fetch_add(1, Ordering::SeqCst);
        context.id = id;
        self.prepared.lock().unwrap().insert(id, (entry, arg));
    }

    unsafe fn switch_context(&self, previous: *mut SimContext, next: *const SimContext) {
        let (previous, next) = unsafe { ((*previous).id, (*next).id) };
        let start = self.prepared.lock().unwrap().remove(&next);
        if let Some((entry, arg)) = start {
            // SAFETY: kernels under test are leaked, so the simulator
            // outlives every thread it starts.
            let sim: &'static Self = unsafe { &*ptr::from_ref(self) };
            std::thread::Builder::new()
                .name(format!("sim-{next}"))
                .spawn(move || {
                    sim.wait_turn(next);
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| entry(arg))) {
                        sim.poison(payload.as_ref());
                    }
                })
                .expect("spawning a simulated thread");
        }
        self.hand_over(next);
        self.wait_turn(previous);
    }

    fn activate(&self, directory: PhysicalPage) {
        self.directory.store(directory.number(), Ordering::SeqCst);
    }

    fn register_timer(&self, callback: ContextEntry, context: usize) {
        *self.timer.lock().unwrap() = Some((callback, context));
    }

    fn halt(&self) {
        panic!("every simulated thread is blocked");
    }
}

/// A kernel on `layout` that has not started scheduling yet.
pub fn new_kernel(layout: MemoryLayout) -> &'static Kernel<Sim> {
    let bitmaps = vec![0_u8; Kernel::<Sim>::bitmap_bytes(&layout)].leak();
    Box::leak(Box::new(Kernel::new(Sim::new(&layout), layout, bitmaps)))
}

/// A kernel on `layout` with the idle thread and the timer running.
pub fn boot(layout: MemoryLayout) -> &'static Kernel<Sim> {
    let kernel = new_kernel(layout);
    kernel.start().unwrap();
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PoolKind;
    use kernel_info::memory::KERNEL_HEAP_START;

    fn layout() -> MemoryLayout {
        MemoryLayout::from_total_memory(8 * 1024 * 1024).with_pool_pages(8, 4)
    }

    #[test]
    fn ram_covers_both_pools() {
        let sim = Sim::new(&layout());
        let end = layout().user_pool.end();
        let last = PhysicalAddress::new(end.as_u32() - 4);
        let word: &mut u32 = unsafe { sim.phys_to_mut(last) };
        *word = 7;
        assert_eq!(sim.active_directory(), KERNEL_PAGE_DIRECTORY.page());
    }

    #[test]
    fn freed_kernel_pages_invalidate_the_tlb() {
        let kernel = new_kernel(layout());
        let page = kernel.allocate_kernel_pages(2).unwrap();
        assert_eq!(page, KERNEL_HEAP_START);
        kernel.free_pages(page, 2);
        assert_eq!(kernel.arch().invalidations(), 2);
        assert_eq!(kernel.pool_usage(PoolKind::Kernel).used, 0);
    }

    #[test]
    fn timer_without_scheduler_is_ignored() {
        let kernel = new_kernel(layout());
        kernel.arch().fire_timer();
        assert_eq!(kernel.ticks(), 0);
        assert!(kernel.arch().are_enabled());
    }
}
