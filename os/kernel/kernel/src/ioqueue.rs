//! # I/O queue
//!
//! A bounded byte ring between producers (a keyboard interrupt, a driver
//! thread) and consumers (a shell). A side that finds the ring full or
//! empty parks in the queue's waiter slot for that side and blocks; the
//! other side wakes it after its next transfer. The queue's [`Lock`] lets
//! only one thread wait at a time, so one slot per side is enough.
//!
//! One byte of the buffer always stays unused, so an `IoQueue<N>` holds at
//! most `N - 1` bytes.

use crate::Kernel;
use crate::arch::Arch;
use crate::sync::Lock;
use crate::thread::{ThreadStatus, Tid};
use kernel_sync::IrqCell;

/// Buffer size of an [`IoQueue`] unless stated otherwise.
pub const IO_QUEUE_SIZE: usize = 64;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Side {
    Producer,
    Consumer,
}

struct Ring<const N: usize> {
    buf: [u8; N],
    /// Next slot to write.
    head: usize,
    /// Next slot to read.
    tail: usize,
    producer: Option<Tid>,
    consumer: Option<Tid>,
}

impl<const N: usize> Ring<N> {
    const fn next(pos: usize) -> usize {
        (pos + 1) % N
    }

    const fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    const fn is_full(&self) -> bool {
        Self::next(self.head) == self.tail
    }

    const fn len(&self) -> usize {
        (self.head + N - self.tail) % N
    }

    fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.buf[self.head] = byte;
        self.head = Self::next(self.head);
        true
    }

    fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.tail];
        self.tail = Self::next(self.tail);
        Some(byte)
    }

    const fn must_wait(&self, side: Side) -> bool {
        match side {
            Side::Producer => self.is_full(),
            Side::Consumer => self.is_empty(),
        }
    }

    const fn waiter(&mut self, side: Side) -> &mut Option<Tid> {
        match side {
            Side::Producer => &mut self.producer,
            Side::Consumer => &mut self.consumer,
        }
    }
}

/// Bounded blocking byte queue.
pub struct IoQueue<const N: usize = IO_QUEUE_SIZE> {
    lock: Lock,
    ring: IrqCell<Ring<N>>,
}

impl<const N: usize> Default for IoQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> IoQueue<N> {
    /// Bytes the queue holds when full.
    pub const CAPACITY: usize = N - 1;

    #[must_use]
    pub const fn new() -> Self {
        const { assert!(N >= 2, "an I/O queue needs room for one byte") };
        Self {
            lock: Lock::new(),
            ring: IrqCell::new(Ring {
                buf: [0; N],
                head: 0,
                tail: 0,
                producer: None,
                consumer: None,
            }),
        }
    }

    /// Append `byte`, blocking while the queue is full.
    pub fn put<A: Arch>(&self, kernel: &Kernel<A>, byte: u8) {
        while !self.try_put(kernel, byte) {
            let _turn = self.lock.lock(kernel);
            self.park(kernel, Side::Producer);
        }
    }

    /// Append `byte` unless the queue is full. Never blocks, so interrupt
    /// handlers can feed the queue.
    pub fn try_put<A: Arch>(&self, kernel: &Kernel<A>, byte: u8) -> bool {
        let consumer = {
            let irq = kernel.irq();
            let mut ring = self.ring.borrow(&irq);
            if !ring.push(byte) {
                return false;
            }
            ring.consumer.take()
        };
        if let Some(tid) = consumer {
            kernel.thread_unblock(tid);
        }
        true
    }

    /// Take the oldest byte, blocking while the queue is empty.
    pub fn get<A: Arch>(&self, kernel: &Kernel<A>) -> u8 {
        loop {
            if let Some(byte) = self.try_get(kernel) {
                return byte;
            }
            let _turn = self.lock.lock(kernel);
            self.park(kernel, Side::Consumer);
        }
    }

    /// Take the oldest byte if there is one.
    pub fn try_get<A: Arch>(&self, kernel: &Kernel<A>) -> Option<u8> {
        let (byte, producer) = {
            let irq = kernel.irq();
            let mut ring = self.ring.borrow(&irq);
            let byte = ring.pop()?;
            (byte, ring.producer.take())
        };
        if let Some(tid) = producer {
            kernel.thread_unblock(tid);
        }
        Some(byte)
    }

    /// Block the running thread as the waiter of `side`, unless the ring
    /// changed since the caller looked.
    fn park<A: Arch>(&self, kernel: &Kernel<A>, side: Side) {
        let me = kernel.current_thread();
        let irq = kernel.irq();
        {
            let mut ring = self.ring.borrow(&irq);
            if !ring.must_wait(side) {
                return;
            }
            let waiter = ring.waiter(side);
            assert!(waiter.is_none(), "{side:?} slot taken by {waiter:?} while {me} waits");
            *waiter = Some(me);
        }
        kernel.block_current(ThreadStatus::Blocked, &irq);
    }

    #[must_use]
    pub fn len<A: Arch>(&self, kernel: &Kernel<A>) -> usize {
        let irq = kernel.irq();
        self.ring.borrow(&irq).len()
    }

    #[must_use]
    pub fn is_empty<A: Arch>(&self, kernel: &Kernel<A>) -> bool {
        let irq = kernel.irq();
        self.ring.borrow(&irq).is_empty()
    }

    #[must_use]
    pub fn is_full<A: Arch>(&self, kernel: &Kernel<A>) -> bool {
        let irq = kernel.irq();
        self.ring.borrow(&irq).is_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Sim, boot};
    use kernel_info::memory::MemoryLayout;
    use std::sync::Mutex;

    fn layout() -> MemoryLayout {
        MemoryLayout::from_total_memory(8 * 1024 * 1024).with_pool_pages(16, 4)
    }

    struct Shared {
        queue: IoQueue<4>,
        seen: Mutex<Vec<u8>>,
    }

    fn leak_shared() -> &'static Shared {
        Box::leak(Box::new(Shared {
            queue: IoQueue::new(),
            seen: Mutex::new(Vec::new()),
        }))
    }

    fn shared(arg: usize) -> &'static Shared {
        // SAFETY: the tests pass a leaked `Shared`.
        unsafe { &*(arg as *const Shared) }
    }

    fn seen(shared: &Shared) -> Vec<u8> {
        shared.seen.lock().unwrap().clone()
    }

    #[test]
    fn bytes_come_out_in_order_and_the_last_slot_stays_free() {
        let kernel = boot(layout());
        let queue = IoQueue::<4>::new();
        assert_eq!(IoQueue::<4>::CAPACITY, 3);
        assert!(queue.is_empty(kernel));

        for byte in *b"abc" {
            assert!(queue.try_put(kernel, byte));
        }
        assert!(queue.is_full(kernel));
        assert!(!queue.try_put(kernel, b'd'));
        assert_eq!(queue.len(kernel), 3);

        assert_eq!(queue.get(kernel), b'a');
        assert!(queue.try_put(kernel, b'd'));
        assert_eq!(queue.try_get(kernel), Some(b'b'));
        assert_eq!(queue.get(kernel), b'c');
        assert_eq!(queue.get(kernel), b'd');
        assert_eq!(queue.try_get(kernel), None);
    }

    fn consumer(kernel: &'static Kernel<Sim>, arg: usize) {
        let shared = shared(arg);
        for _ in 0..2 {
            let byte = shared.queue.get(kernel);
            shared.seen.lock().unwrap().push(byte);
        }
    }

    #[test]
    fn consumer_sleeps_until_a_byte_arrives() {
        let kernel = boot(layout());
        let shared = leak_shared();
        let tid = kernel
            .thread_start("consumer", 5, consumer, core::ptr::from_ref(shared) as usize)
            .unwrap();

        kernel.thread_yield();
        assert_eq!(kernel.thread_info(tid).unwrap().status, ThreadStatus::Blocked);
        assert_eq!(shared.queue.lock.holder(kernel), Some(tid));

        shared.queue.put(kernel, b'x');
        assert_eq!(kernel.thread_info(tid).unwrap().status, ThreadStatus::Ready);
        kernel.thread_yield();
        assert_eq!(seen(shared), b"x");
        assert_eq!(kernel.thread_info(tid).unwrap().status, ThreadStatus::Blocked);

        assert!(shared.queue.try_put(kernel, b'y'));
        kernel.thread_yield();
        assert_eq!(seen(shared), b"xy");
        assert_eq!(kernel.thread_info(tid).unwrap().status, ThreadStatus::Died);
        assert_eq!(shared.queue.lock.holder(kernel), None);
    }

    fn producer(kernel: &'static Kernel<Sim>, arg: usize) {
        let shared = shared(arg);
        for byte in *b"hello" {
            shared.queue.put(kernel, byte);
        }
    }

    #[test]
    fn producer_sleeps_while_the_queue_is_full() {
        let kernel = boot(layout());
        let shared = leak_shared();
        let tid = kernel
            .thread_start("producer", 5, producer, core::ptr::from_ref(shared) as usize)
            .unwrap();

        kernel.thread_yield();
        assert_eq!(kernel.thread_info(tid).unwrap().status, ThreadStatus::Blocked);
        assert!(shared.queue.is_full(kernel));

        let mut out = Vec::new();
        while out.len() < 5 {
            out.push(shared.queue.get(kernel));
            kernel.thread_yield();
        }
        assert_eq!(out, b"hello");
        assert_eq!(kernel.thread_info(tid).unwrap().status, ThreadStatus::Died);
        assert!(shared.queue.is_empty(kernel));
    }
}
