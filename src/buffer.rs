//! Circular byte buffers bridging the two execution contexts
//!
//! A [`RingBuffer`] is split once into a [`Producer`] and a [`Consumer`].
//! The producer is the only writer of the head index, and the consumer is
//! the only writer of the tail index. `head - tail (mod N)` is the number of
//! bytes written and not yet consumed. One slot is always left empty, so a
//! buffer holding `N - 1` bytes is full.
//!
//! Besides the streaming `push` / `pop` style calls used by the application,
//! both halves expose index-based access. The endpoint engine uses it to
//! stage a packet past the head (OUT), or to read a packet past the tail (IN),
//! before it publishes the new index.

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Fixed-capacity byte storage with independent head and tail
///
/// `N` must be a power of two, and at least 2.
pub struct RingBuffer<const N: usize> {
    data: [UnsafeCell<u8>; N],
    head: AtomicUsize,
    tail: AtomicUsize,
    taken: AtomicBool,
}

// Safety: a byte is only written by the producer while it's outside of
// [tail, head), and only read by the consumer while it's inside. The index
// publication orders the two.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    const CAPACITY_CHECK: () = assert!(N >= 2 && N.is_power_of_two());

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_CHECK;
        #[allow(clippy::declare_interior_mutable_const)]
        const BYTE: UnsafeCell<u8> = UnsafeCell::new(0);
        RingBuffer {
            data: [BYTE; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            taken: AtomicBool::new(false),
        }
    }

    /// Split the buffer into its producer and consumer halves.
    ///
    /// Returns `None` if the buffer was already split.
    pub fn split(&self) -> Option<(Producer<'_>, Consumer<'_>)> {
        let taken = self.taken.swap(true, Ordering::SeqCst);
        (!taken).then(|| {
            let ring = Ring {
                data: &self.data,
                head: &self.head,
                tail: &self.tail,
                mask: N - 1,
            };
            (Producer { ring }, Consumer { ring })
        })
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased view shared by both halves
#[derive(Clone, Copy)]
struct Ring<'a> {
    data: &'a [UnsafeCell<u8>],
    head: &'a AtomicUsize,
    tail: &'a AtomicUsize,
    mask: usize,
}

impl Ring<'_> {
    fn occupied(&self, head: usize, tail: usize) -> usize {
        head.wrapping_sub(tail) & self.mask
    }
    /// # Safety
    ///
    /// Caller must own the slot at `index` for writing.
    unsafe fn store(&self, index: usize, byte: u8) {
        self.data[index & self.mask].get().write(byte)
    }
    /// # Safety
    ///
    /// The slot at `index` must hold a published byte.
    unsafe fn load(&self, index: usize) -> u8 {
        self.data[index & self.mask].get().read()
    }
}

/// The writing half of a [`RingBuffer`]
pub struct Producer<'a> {
    ring: Ring<'a>,
}

// Safety: see the Sync impl on RingBuffer. There's only one producer.
unsafe impl Send for Producer<'_> {}

impl Producer<'_> {
    /// Returns the buffer capacity, including the reserved slot
    pub fn capacity(&self) -> usize {
        self.ring.mask + 1
    }

    /// Returns the head index
    ///
    /// The producer owns the head, so this is always current.
    pub fn head(&self) -> usize {
        self.ring.head.load(Ordering::Relaxed)
    }

    /// Returns the number of bytes that can be written past the head
    pub fn free(&self) -> usize {
        let head = self.head();
        let tail = self.ring.tail.load(Ordering::Acquire);
        self.ring.mask - self.ring.occupied(head, tail)
    }

    pub fn is_full(&self) -> bool {
        self.free() == 0
    }

    /// Write `byte` at `distance` bytes past the head, without publishing it
    ///
    /// Returns `false` and writes nothing if that slot isn't free.
    pub fn stage(&mut self, distance: usize, byte: u8) -> bool {
        if distance >= self.free() {
            return false;
        }
        let index = self.head().wrapping_add(distance);
        // Safety: the slot is outside of [tail, head), and only we write it.
        unsafe { self.ring.store(index, byte) };
        true
    }

    /// Publish `count` staged bytes to the consumer
    pub fn commit(&mut self, count: usize) {
        debug_assert!(count <= self.free());
        let head = self.head().wrapping_add(count) & self.ring.mask;
        self.ring.head.store(head, Ordering::Release);
    }

    /// Write and publish a single byte
    pub fn push(&mut self, byte: u8) -> bool {
        let staged = self.stage(0, byte);
        if staged {
            self.commit(1);
        }
        staged
    }

    /// Write and publish as many bytes of `buffer` as fit
    ///
    /// Returns the number of bytes written.
    pub fn write(&mut self, buffer: &[u8]) -> usize {
        let size = self.free().min(buffer.len());
        for (distance, byte) in buffer.iter().take(size).enumerate() {
            self.stage(distance, *byte);
        }
        self.commit(size);
        size
    }
}

/// The reading half of a [`RingBuffer`]
pub struct Consumer<'a> {
    ring: Ring<'a>,
}

// Safety: see the Sync impl on RingBuffer. There's only one consumer.
unsafe impl Send for Consumer<'_> {}

impl Consumer<'_> {
    /// Returns the buffer capacity, including the reserved slot
    pub fn capacity(&self) -> usize {
        self.ring.mask + 1
    }

    /// Returns the tail index
    ///
    /// The consumer owns the tail, so this is always current.
    pub fn tail(&self) -> usize {
        self.ring.tail.load(Ordering::Relaxed)
    }

    /// Returns the number of published bytes past the tail
    pub fn len(&self) -> usize {
        let head = self.ring.head.load(Ordering::Acquire);
        self.ring.occupied(head, self.tail())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the byte `distance` bytes past the tail, without consuming it
    pub fn peek(&self, distance: usize) -> Option<u8> {
        (distance < self.len()).then(|| {
            // Safety: the slot is inside [tail, head), published by the producer.
            unsafe { self.ring.load(self.tail().wrapping_add(distance)) }
        })
    }

    /// Consume `count` bytes, handing their slots back to the producer
    pub fn release(&mut self, count: usize) {
        debug_assert!(count <= self.len());
        let tail = self.tail().wrapping_add(count) & self.ring.mask;
        self.ring.tail.store(tail, Ordering::Release);
    }

    /// Consume every published byte
    ///
    /// Only moves the tail forward, so a producer that's mid-write never
    /// loses a slot it already considered free.
    pub fn discard(&mut self) {
        let head = self.ring.head.load(Ordering::Acquire);
        self.ring.tail.store(head, Ordering::Release);
    }

    /// Read and consume a single byte
    pub fn pop(&mut self) -> Option<u8> {
        let byte = self.peek(0)?;
        self.release(1);
        Some(byte)
    }

    /// Read and consume as many bytes as fit in `buffer`
    ///
    /// Returns the number of bytes read.
    pub fn read(&mut self, buffer: &mut [u8]) -> usize {
        let size = self.len().min(buffer.len());
        for (distance, byte) in buffer.iter_mut().take(size).enumerate() {
            // Safety: distance < size <= len.
            *byte = unsafe { self.ring.load(self.tail().wrapping_add(distance)) };
        }
        self.release(size);
        size
    }
}
