//! Simulated physical RAM for the unit tests.

use core::cell::Cell;
use kernel_info::memory::{KERNEL_PAGE_DIRECTORY, RESERVED_LOW_MEMORY};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualPage};
use kernel_vmem::{AddressSpace, PhysMapper, TlbInvalidate};

#[repr(C, align(4096))]
struct Frame([u8; PAGE_SIZE as usize]);

/// Frame `n` lives at physical address `n * 4096`; the kernel directory and
/// its tables sit where the loader puts them.
pub struct SimRam {
    frames: Box<[Frame]>,
    invalidations: Cell<usize>,
}

impl SimRam {
    /// RAM up to [`RESERVED_LOW_MEMORY`] plus 64 free frames, with the kernel
    /// directory laid out.
    pub fn with_kernel_directory() -> Self {
        let count = (RESERVED_LOW_MEMORY / PAGE_SIZE) as usize + 64;
        let ram = Self {
            frames: (0..count).map(|_| Frame([0; PAGE_SIZE as usize])).collect(),
            invalidations: Cell::new(0),
        };
        ram.kernel_space().init_kernel();
        ram
    }

    pub fn kernel_space(&self) -> AddressSpace<'_, Self> {
        AddressSpace::from_root(self, KERNEL_PAGE_DIRECTORY.page())
    }

    /// First frame not used by the loader.
    pub fn free_base(&self) -> PhysicalAddress {
        PhysicalAddress::new(RESERVED_LOW_MEMORY)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.get()
    }
}

impl PhysMapper for SimRam {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let offset = pa.as_usize();
        assert!(offset < self.frames.len() * PAGE_SIZE as usize, "{pa} outside simulated RAM");
        let base = self.frames.as_ptr().cast::<u8>().cast_mut();
        unsafe { &mut *base.add(offset).cast::<T>() }
    }
}

impl TlbInvalidate for SimRam {
    fn invalidate_page(&self, _page: VirtualPage) {
        self.invalidations.set(self.invalidations.get() + 1);
    }
}
