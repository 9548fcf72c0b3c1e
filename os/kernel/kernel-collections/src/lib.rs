//! # Kernel collections
//!
//! The two bookkeeping structures every allocator and the scheduler are
//! built from:
//!
//! - [`Bitmap`]: a fixed-capacity bit vector with a first-fit search for
//!   runs of free bits. Bit `i` set means unit `i` (frame, page) is in use.
//! - [`List`]: a doubly linked queue whose links live *outside* the list,
//!   in a [`LinkStore`] owned by whoever owns the records. Nodes are plain
//!   handles (a thread id, a block address), so the owning record is never
//!   recovered by pointer arithmetic.
//!
//! Neither type synchronizes. Callers keep them inside state that is only
//! reachable under an interrupt guard or a pool lock.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod bitmap;
mod list;

pub use bitmap::Bitmap;
pub use list::{Iter, Link, LinkStore, List};
