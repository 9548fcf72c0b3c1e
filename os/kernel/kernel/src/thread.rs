//! # Thread control blocks
//!
//! Threads live in a fixed table owned by the scheduler and are named by
//! their slot, a [`Tid`]. Queue membership (ready queue, semaphore wait
//! queues, the all-threads queue) is kept in link tables next to the slot
//! table, so a thread never has to be found from a list node by address.

use crate::Kernel;
use crate::arch::Arch;
use crate::process::Process;
use core::fmt;
use kernel_info::sched::{MAX_THREADS, THREAD_NAME_LEN};
use kernel_memory_addresses::VirtualAddress;

/// Handle of a thread: its slot in the thread table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Tid(u16);

impl Tid {
    pub(crate) const fn new(slot: usize) -> Self {
        debug_assert!(slot < MAX_THREADS);
        #[allow(clippy::cast_possible_truncation)]
        Self(slot as u16)
    }

    #[must_use]
    pub const fn slot(self) -> usize {
        self.0 as usize
    }
}

impl From<Tid> for usize {
    #[inline]
    fn from(tid: Tid) -> Self {
        tid.slot()
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid {}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThreadStatus {
    Running,
    Ready,
    Blocked,
    Waiting,
    Hanging,
    Died,
}

impl ThreadStatus {
    /// Whether this is one of the states a thread may block itself with.
    #[must_use]
    pub const fn is_blocked(self) -> bool {
        matches!(self, Self::Blocked | Self::Waiting | Self::Hanging)
    }
}

/// A thread name, truncated to fit [`THREAD_NAME_LEN`] bytes.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct ThreadName {
    bytes: [u8; THREAD_NAME_LEN],
    len: u8,
}

impl ThreadName {
    #[must_use]
    pub fn new(name: &str) -> Self {
        let mut len = name.len().min(THREAD_NAME_LEN - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0; THREAD_NAME_LEN];
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        #[allow(clippy::cast_possible_truncation)]
        Self {
            bytes,
            len: len as u8,
        }
    }

    /// This name with `suffix` appended, truncated like [`new`](Self::new).
    #[must_use]
    pub fn with_suffix(&self, suffix: &str) -> Self {
        let mut joined = [0; 2 * THREAD_NAME_LEN];
        let name = self.as_str();
        let mut cut = suffix.len().min(THREAD_NAME_LEN);
        while !suffix.is_char_boundary(cut) {
            cut -= 1;
        }
        let suffix = &suffix[..cut];
        joined[..name.len()].copy_from_slice(name.as_bytes());
        joined[name.len()..name.len() + suffix.len()].copy_from_slice(suffix.as_bytes());
        match core::str::from_utf8(&joined[..name.len() + suffix.len()]) {
            Ok(joined) => Self::new(joined),
            Err(_) => *self,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        // Only ever cut at a char boundary.
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }
}

impl fmt::Debug for ThreadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ThreadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Function a thread runs. When it returns, the thread exits.
pub type ThreadEntry<A> = fn(&'static Kernel<A>, usize);

/// Thread control block.
pub(crate) struct Thread<A: Arch> {
    pub name: ThreadName,
    pub pid: u32,
    /// Pid of the process this one was forked from.
    pub parent_pid: Option<u32>,
    pub status: ThreadStatus,
    pub priority: u8,
    /// Remaining quantum.
    pub ticks: u8,
    pub elapsed_ticks: u32,
    /// Base of the kernel stack page; `None` for the boot flow.
    pub stack: Option<VirtualAddress>,
    pub context: A::Context,
    pub entry: Option<(ThreadEntry<A>, usize)>,
    pub process: Option<Process>,
}

impl<A: Arch> Thread<A> {
    pub fn new(name: &str, pid: u32, priority: u8, stack: Option<VirtualAddress>) -> Self {
        Self {
            name: ThreadName::new(name),
            pid,
            parent_pid: None,
            status: ThreadStatus::Ready,
            priority,
            ticks: priority,
            elapsed_ticks: 0,
            stack,
            context: A::Context::default(),
            entry: None,
            process: None,
        }
    }

    pub fn info(&self, tid: Tid) -> ThreadInfo {
        ThreadInfo {
            tid,
            pid: self.pid,
            parent_pid: self.parent_pid,
            name: self.name,
            status: self.status,
            priority: self.priority,
            elapsed_ticks: self.elapsed_ticks,
            is_process: self.process.is_some(),
        }
    }
}

/// What `ps` shows about a thread.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ThreadInfo {
    pub tid: Tid,
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub name: ThreadName,
    pub status: ThreadStatus,
    pub priority: u8,
    pub elapsed_ticks: u32,
    pub is_process: bool,
}

/// The all-threads queue at one point in time, in creation order.
pub struct ThreadSnapshot {
    entries: [Option<ThreadInfo>; MAX_THREADS],
    len: usize,
}

impl ThreadSnapshot {
    pub(crate) const fn new() -> Self {
        Self {
            entries: [None; MAX_THREADS],
            len: 0,
        }
    }

    pub(crate) fn push(&mut self, info: ThreadInfo) {
        self.entries[self.len] = Some(info);
        self.len += 1;
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadInfo> {
        self.entries[..self.len].iter().flatten()
    }

    /// The first thread called `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&ThreadInfo> {
        self.iter().find(|t| t.name.as_str() == name)
    }
}
