//! # Size-classed arena heap
//!
//! Small requests are served from *arenas*: single pages split into
//! equally sized blocks of one of seven classes (16 to 1024 bytes). Larger
//! requests get whole pages of their own.
//!
//! ```text
//!  page base                                                 base + 4096
//!  ┌──────────────┬─────────┬─────────┬─────┬─────────┬──────────┐
//!  │ ArenaHeader  │ block 0 │ block 1 │ ... │ block n │  slack   │
//!  │ magic|class| │         │         │     │         │          │
//!  │ count (12 B) │         │         │     │         │          │
//!  └──────────────┴─────────┴─────────┴─────┴─────────┴──────────┘
//! ```
//!
//! The header sits at the page boundary, so the arena owning any block is
//! found by masking the block address down to its page. While a block is
//! free its first eight bytes hold the `prev`/`next` links of the class's
//! free list, followed by a tag word marking the block as free. For small
//! arenas `count` is the number of free blocks; once it reaches the class's
//! block count the page goes back to the page allocator.
//! For large arenas `count` is the page count.

use crate::vmm::VmmError;
use kernel_collections::{Link, LinkStore, List};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, VirtualPage, pages_for};

/// Bytes reserved at the start of every arena page.
pub const ARENA_HEADER_SIZE: u32 = 12;

/// Block sizes of the small classes.
pub const SIZE_CLASSES: [u32; 7] = [16, 32, 64, 128, 256, 512, 1024];

/// Largest request served from a small class.
pub const MAX_SMALL_SIZE: usize = SIZE_CLASSES[SIZE_CLASSES.len() - 1] as usize;

const ARENA_MAGIC: u32 = 0x4152_454E;
const LARGE: u32 = u32::MAX;

/// Written behind the links of every block on a free list.
const FREE_TAG: u32 = 0x4652_4545;

/// Offset of the free tag inside a free block.
const FREE_TAG_OFFSET: usize = 8;

/// Where arenas come from.
pub trait PageSource {
    /// Allocate `count` zeroed, mapped, virtually contiguous pages.
    ///
    /// # Errors
    /// Whatever the page allocator reports.
    fn allocate_pages(&mut self, count: usize) -> Result<VirtualAddress, VmmError>;

    /// Release pages obtained from [`allocate_pages`](Self::allocate_pages).
    fn free_pages(&mut self, base: VirtualAddress, count: usize);

    fn page(&self, page: VirtualPage) -> &[u8; PAGE_SIZE as usize];

    fn page_mut(&mut self, page: VirtualPage) -> &mut [u8; PAGE_SIZE as usize];
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    #[error("zero-sized allocation")]
    ZeroSize,
    #[error("allocation of {0} bytes exceeds the address space")]
    TooLarge(usize),
    #[error("heap exhausted: {0}")]
    Exhausted(#[from] VmmError),
}

/// What the header of an arena says, as seen by tests and diagnostics.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ArenaInfo {
    /// Block size for small arenas, `None` for large ones.
    pub block_size: Option<u32>,
    /// Free blocks (small) or pages (large).
    pub count: u32,
}

impl ArenaInfo {
    #[must_use]
    pub const fn is_large(&self) -> bool {
        self.block_size.is_none()
    }
}

#[derive(Copy, Clone)]
struct ArenaHeader {
    magic: u32,
    class: u32,
    count: u32,
}

impl ArenaHeader {
    fn read(bytes: &[u8; PAGE_SIZE as usize]) -> Self {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            magic: word(0),
            class: word(4),
            count: word(8),
        }
    }

    fn write(self, bytes: &mut [u8; PAGE_SIZE as usize]) {
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.class.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.count.to_le_bytes());
    }

    fn load<P: PageSource + ?Sized>(src: &P, addr: VirtualAddress) -> Self {
        let header = Self::read(src.page(addr.page()));
        assert_eq!(
            header.magic, ARENA_MAGIC,
            "heap: {addr} does not belong to an arena"
        );
        header
    }
}

/// Free-list links stored inside the free blocks themselves.
struct BlockLinks<'s, P: ?Sized>(&'s mut P);

impl<P: PageSource + ?Sized> BlockLinks<'_, P> {
    fn tag(&self, block: VirtualAddress) -> u32 {
        let bytes = self.0.page(block.page());
        let at = block.offset() as usize + FREE_TAG_OFFSET;
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    fn mark_free(&mut self, block: VirtualAddress) {
        let bytes = self.0.page_mut(block.page());
        let at = block.offset() as usize + FREE_TAG_OFFSET;
        bytes[at..at + 4].copy_from_slice(&FREE_TAG.to_le_bytes());
    }
}

impl<P: PageSource + ?Sized> LinkStore<VirtualAddress> for BlockLinks<'_, P> {
    fn link(&self, node: VirtualAddress) -> Link<VirtualAddress> {
        let bytes = self.0.page(node.page());
        let at = node.offset() as usize;
        let word = |i: usize| {
            let raw = u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
            (raw != 0).then(|| VirtualAddress::new(raw))
        };
        Link {
            prev: word(at),
            next: word(at + 4),
        }
    }

    fn set_link(&mut self, node: VirtualAddress, link: Link<VirtualAddress>) {
        let bytes = self.0.page_mut(node.page());
        let at = node.offset() as usize;
        let raw = |v: Option<VirtualAddress>| v.map_or(0, VirtualAddress::as_u32).to_le_bytes();
        bytes[at..at + 4].copy_from_slice(&raw(link.prev));
        bytes[at + 4..at + 8].copy_from_slice(&raw(link.next));
    }
}

/// One size class.
#[derive(Clone)]
pub struct SizeClass {
    block_size: u32,
    blocks_per_arena: u32,
    free: List<VirtualAddress>,
}

impl SizeClass {
    const fn new(block_size: u32) -> Self {
        Self {
            block_size,
            blocks_per_arena: (PAGE_SIZE - ARENA_HEADER_SIZE) / block_size,
            free: List::new(),
        }
    }

    #[must_use]
    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    #[must_use]
    pub const fn blocks_per_arena(&self) -> u32 {
        self.blocks_per_arena
    }

    /// Blocks currently on the free list.
    #[must_use]
    pub const fn free_blocks(&self) -> usize {
        self.free.len()
    }

    fn block(&self, arena: VirtualPage, i: u32) -> VirtualAddress {
        arena.join(ARENA_HEADER_SIZE + i * self.block_size)
    }
}

/// The seven size classes of one heap (the kernel's, or one process's).
///
/// The free lists live in the heap's own pages, so a clone is only valid
/// over a copy of those pages at the same addresses.
#[derive(Clone)]
pub struct SizeClasses {
    classes: [SizeClass; SIZE_CLASSES.len()],
}

impl Default for SizeClasses {
    fn default() -> Self {
        Self::new()
    }
}

impl SizeClasses {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            classes: [
                SizeClass::new(SIZE_CLASSES[0]),
                SizeClass::new(SIZE_CLASSES[1]),
                SizeClass::new(SIZE_CLASSES[2]),
                SizeClass::new(SIZE_CLASSES[3]),
                SizeClass::new(SIZE_CLASSES[4]),
                SizeClass::new(SIZE_CLASSES[5]),
                SizeClass::new(SIZE_CLASSES[6]),
            ],
        }
    }

    #[must_use]
    pub fn classes(&self) -> &[SizeClass] {
        &self.classes
    }

    /// Index of the smallest class fitting `size`, if any.
    #[must_use]
    pub fn class_for(size: usize) -> Option<usize> {
        SIZE_CLASSES.iter().position(|&s| s as usize >= size)
    }

    /// Allocate `size` bytes. Small blocks are zeroed.
    ///
    /// # Errors
    /// - [`HeapError::ZeroSize`] for `size == 0`.
    /// - [`HeapError::TooLarge`] if the page count overflows.
    /// - [`HeapError::Exhausted`] if `src` has no pages left.
    #[allow(clippy::cast_possible_truncation)]
    pub fn allocate<P: PageSource + ?Sized>(
        &mut self,
        src: &mut P,
        size: usize,
    ) -> Result<VirtualAddress, HeapError> {
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }
        let Some(index) = Self::class_for(size) else {
            return Self::allocate_large(src, size);
        };

        let class = &mut self.classes[index];
        if class.free.is_empty() {
            let base = src.allocate_pages(1)?;
            let arena = base.page();
            ArenaHeader {
                magic: ARENA_MAGIC,
                class: index as u32,
                count: class.blocks_per_arena,
            }
            .write(src.page_mut(arena));

            let mut links = BlockLinks(&mut *src);
            for i in 0..class.blocks_per_arena {
                let block = class.block(arena, i);
                class.free.push_back(&mut links, block);
                links.mark_free(block);
            }
            log::debug!("heap: new {}-byte arena at {arena}", class.block_size);
        }

        let Some(block) = class.free.pop_front(&mut BlockLinks(&mut *src)) else {
            unreachable!("a fresh arena has free blocks");
        };
        let bytes = src.page_mut(block.page());
        let mut header = ArenaHeader::read(bytes);
        header.count -= 1;
        header.write(bytes);

        let at = block.offset() as usize;
        bytes[at..at + class.block_size as usize].fill(0);
        Ok(block)
    }

    fn allocate_large<P: PageSource + ?Sized>(
        src: &mut P,
        size: usize,
    ) -> Result<VirtualAddress, HeapError> {
        let bytes = u32::try_from(size)
            .ok()
            .and_then(|s| s.checked_add(ARENA_HEADER_SIZE))
            .ok_or(HeapError::TooLarge(size))?;
        let pages = pages_for(bytes);

        let base = src.allocate_pages(pages as usize)?;
        ArenaHeader {
            magic: ARENA_MAGIC,
            class: LARGE,
            count: pages,
        }
        .write(src.page_mut(base.page()));
        log::debug!("heap: {size} bytes as {pages} whole pages at {base}");
        Ok(base + ARENA_HEADER_SIZE)
    }

    /// Return a block obtained from [`allocate`](Self::allocate).
    ///
    /// ### Panics
    /// If `addr` is not inside an arena, is not a block start, or is already
    /// free.
    pub fn free<P: PageSource + ?Sized>(&mut self, src: &mut P, addr: VirtualAddress) {
        let arena = addr.page();
        let header = ArenaHeader::load(src, addr);

        if header.class == LARGE {
            assert_eq!(
                addr,
                arena.join(ARENA_HEADER_SIZE),
                "heap: {addr} is not the start of a large allocation"
            );
            src.free_pages(arena.base(), header.count as usize);
            return;
        }

        let class = &mut self.classes[header.class as usize];
        let offset = addr.offset() - ARENA_HEADER_SIZE;
        assert!(
            offset % class.block_size == 0 && offset / class.block_size < class.blocks_per_arena,
            "heap: {addr} is not a block start"
        );

        let mut links = BlockLinks(&mut *src);
        // Live data may hold the tag by chance; only the list walk is conclusive.
        assert!(
            links.tag(addr) != FREE_TAG || !class.free.contains(&links, addr),
            "heap: double free of {addr}"
        );
        class.free.push_back(&mut links, addr);
        links.mark_free(addr);

        let count = header.count + 1;
        if count == class.blocks_per_arena {
            for i in 0..class.blocks_per_arena {
                let block = class.block(arena, i);
                class.free.remove(&mut links, block);
            }
            src.free_pages(arena.base(), 1);
            log::debug!("heap: released {}-byte arena at {arena}", class.block_size);
        } else {
            ArenaHeader { count, ..header }.write(src.page_mut(arena));
        }
    }

    /// Decode the arena header for the allocation at `addr`.
    ///
    /// ### Panics
    /// If `addr` is not inside an arena.
    #[must_use]
    pub fn arena_info<P: PageSource + ?Sized>(src: &P, addr: VirtualAddress) -> ArenaInfo {
        let header = ArenaHeader::load(src, addr);
        ArenaInfo {
            block_size: (header.class != LARGE).then(|| SIZE_CLASSES[header.class as usize]),
            count: header.count,
        }
    }
}
