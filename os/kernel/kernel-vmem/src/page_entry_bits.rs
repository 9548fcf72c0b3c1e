use bitfield_struct::bitfield;
use kernel_memory_addresses::{PAGE_SHIFT, PhysicalAddress, PhysicalPage};

/// Represents a single 32-bit x86 paging entry in its raw bitfield form.
///
/// Directory entries (PDE) and table entries (PTE) share this layout. A PDE
/// points at a page table; a PTE maps one 4 KiB frame.
///
/// ### Bit layout
///
/// | Bits  | Name / Mnemonic | Meaning |
/// |-------|-----------------|---------|
/// | 0     | `P` (present)   | Valid entry if set |
/// | 1     | `RW`            | Writable if set |
/// | 2     | `US`            | User-mode accessible if set |
/// | 3     | `PWT`           | Write-through caching |
/// | 4     | `PCD`           | Disable caching |
/// | 5     | `A`             | Accessed |
/// | 6     | `D`             | Dirty (PTE only) |
/// | 7     | `PS` / `PAT`    | 4 MiB page in a PDE, PAT in a PTE |
/// | 8     | `G`             | Global (PTE only) |
/// | 9–11  | OS avail        | Reserved for OS use |
/// | 12–31 | `addr`          | Physical frame number |
///
/// ### Notes
/// - The effective permission of a mapping is the intersection of the PDE and
///   PTE bits, so directory entries for user-reachable tables carry `US`.
/// - The physical address field omits the lower 12 bits.
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalPage;
/// # use kernel_vmem::PageEntryBits;
/// let mut e = PageEntryBits::new();
/// e.set_present(true);
/// e.set_writable(true);
/// e.set_frame_page(PhysicalPage::from_number(0x123));
/// assert!(e.present());
/// assert_eq!(e.physical_address().as_u32(), 0x0012_3000);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (bit 0).
    ///
    /// A clear bit makes every other field software-defined; any access
    /// through it raises a page fault.
    pub present: bool,

    /// Writable (bit 1).
    pub writable: bool,

    /// User/Supervisor (bit 2).
    ///
    /// Clear restricts the mapping to CPL0.
    pub user_access: bool,

    /// Page Write-Through (bit 3).
    pub write_through: bool,

    /// Page Cache Disable (bit 4).
    pub cache_disabled: bool,

    /// Accessed (bit 5). Set by the CPU on first access.
    pub accessed: bool,

    /// Dirty (bit 6). Set by the CPU on first write through a PTE.
    pub dirty: bool,

    /// Page size (bit 7) in a PDE; PAT in a PTE. Always clear here.
    pub large_page: bool,

    /// Global (bit 8).
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame_number: u32,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_frame_page(&mut self, page: PhysicalPage) {
        self.set_frame_number(page.number());
    }

    #[inline]
    #[must_use]
    pub const fn frame_page(&self) -> PhysicalPage {
        PhysicalPage::from_number(self.frame_number())
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_number() << PAGE_SHIFT)
    }

    /// Leaf flags for kernel data: present, writable, supervisor only.
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(false)
    }

    /// Leaf flags for user data: present, writable, user accessible.
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
    }

    /// Flags for a directory entry linking a page table.
    ///
    /// Leaves decide the final protection; the link itself is permissive.
    #[inline]
    #[must_use]
    pub const fn table_link() -> Self {
        Self::user_rw()
    }
}
