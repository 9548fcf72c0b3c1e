use kernel_alloc::{HeapError, VmmError};

/// Why a page or heap request failed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MemoryError {
    #[error("the running thread is not a process")]
    NotAProcess,
    #[error(transparent)]
    Vmm(#[from] VmmError),
    #[error(transparent)]
    Heap(#[from] HeapError),
}

/// Why a thread or process could not be started.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ThreadError {
    #[error("thread table is full")]
    TableFull,
    #[error("out of memory: {0}")]
    Memory(#[from] MemoryError),
}
