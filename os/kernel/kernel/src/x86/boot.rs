//! Bare-metal entry and panic handler.
//!
//! The loader enters [`kernel_main`] in protected mode with paging on: the
//! kernel directory at `KERNEL_PAGE_DIRECTORY`, the first megabyte mapped at
//! `KERNEL_SPACE_START`, the detected RAM size at `TOTAL_MEMORY_ADDRESS` and
//! the boot stack in `BOOT_STACK_PAGE`.

use super::X86;
use crate::Kernel;
use core::mem::MaybeUninit;
use core::panic::PanicInfo;
use kernel_info::boot::{BootInfo, MEMORY_BITMAP_BASE, MEMORY_BITMAP_PAGES, TOTAL_MEMORY_ADDRESS};
use kernel_info::memory::{DIRECT_MAP_BASE, DIRECT_MAP_LIMIT, KERNEL_SPACE_START, SELF_MAP_BASE};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage, VirtualAddress};
use kernel_qemu::QemuLogger;
use kernel_sync::InterruptControl;
use kernel_vmem::{PageEntryBits, PageTable, PtEntry, split_indices};
use log::LevelFilter;

static mut KERNEL: MaybeUninit<Kernel<X86>> = MaybeUninit::uninit();

#[unsafe(no_mangle)]
pub extern "C" fn kernel_main() -> ! {
    QemuLogger::new(LevelFilter::Debug).init().ok();

    // SAFETY: the loader maps the first megabyte at the start of kernel space.
    let total_memory = unsafe {
        ((KERNEL_SPACE_START.as_u32() + TOTAL_MEMORY_ADDRESS.as_u32()) as *const u32).read_volatile()
    };
    let layout = BootInfo::new(total_memory).layout();
    map_physical_memory(layout.total_memory);

    let bitmap_len = Kernel::<X86>::bitmap_bytes(&layout);
    assert!(
        bitmap_len <= (MEMORY_BITMAP_PAGES * PAGE_SIZE) as usize,
        "pool bitmaps overflow the bitmap region"
    );
    // SAFETY: the bitmap region is reserved low memory, mapped by the loader.
    let bitmaps =
        unsafe { core::slice::from_raw_parts_mut(MEMORY_BITMAP_BASE.as_usize() as *mut u8, bitmap_len) };
    bitmaps.fill(0);

    // SAFETY: written once, before any other thread exists.
    let kernel: &'static Kernel<X86> =
        unsafe { (*(&raw mut KERNEL)).write(Kernel::new(X86, layout, bitmaps)) };

    if let Err(e) = kernel.start() {
        panic!("cannot start the scheduler: {e}");
    }
    X86.enable();

    log::info!("boot complete");
    kernel.thread_exit()
}

/// Map every frame of RAM at `DIRECT_MAP_BASE`.
///
/// The kernel page tables are reached through the self-map, since nothing
/// else maps them yet.
fn map_physical_memory(total_memory: u32) {
    let frames = total_memory.min(DIRECT_MAP_LIMIT) / PAGE_SIZE;
    for frame in 0..frames {
        let va = VirtualAddress::new(DIRECT_MAP_BASE.as_u32() + frame * PAGE_SIZE);
        let (di, ti) = split_indices(va);
        let table = (SELF_MAP_BASE.as_u32() + di.as_usize() as u32 * PAGE_SIZE) as *mut PageTable;
        // SAFETY: kernel tables exist from boot and are self-mapped.
        unsafe {
            (*table).set(
                ti,
                PtEntry::make_4k(PhysicalPage::from_number(frame), PageEntryBits::kernel_rw()),
            );
        }
    }

    // Flush the whole TLB.
    unsafe {
        core::arch::asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack, preserves_flags)
        );
    }
    log::info!("direct map: {frames} frames at {DIRECT_MAP_BASE}");
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    X86.disable();
    log::error!("kernel panic: {info}");
    loop {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) }
    }
}
