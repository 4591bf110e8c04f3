//! Lock-free single-producer single-consumer byte ring.
//!
//! Unlike an element ring, this queue transfers opaque byte payloads: the
//! producer reserves a contiguous region with [`ByteQueue::begin_write`],
//! fills it with one complete record and publishes it with
//! [`WriteGrant::commit`]; the consumer takes everything published so far as
//! one or two slices with [`ByteQueue::begin_read`] and releases them with
//! [`ReadBatch::release`]. Record framing is the caller's business.
//!
//! Indices are absolute positions in `[0, capacity)`. The queue is empty when
//! the indices are equal, so one byte of capacity always stays unused. When
//! the tail segment cannot hold a whole reservation the grant is placed at
//! the front of the buffer and a data-end marker records where valid tail
//! data stops.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

pub struct ByteQueue {
    buffer: Box<[UnsafeCell<u8>]>,

    /// Producer-owned position; consumer reads it with Acquire.
    /// Cache-padded to prevent false sharing with `read`.
    write: CachePadded<AtomicUsize>,

    /// Consumer-owned position; producer reads it with Acquire.
    read: CachePadded<AtomicUsize>,

    /// Where valid data in the tail segment ends. Only meaningful while the
    /// readable region wraps; published by the `write` release store.
    data_end: AtomicUsize,
}

// SAFETY: the byte cells are only written through a producer-held WriteGrant
// and only read by the consumer after the grant was published via the
// release/acquire index pair, so the two sides never touch a cell
// concurrently as long as the single-producer/single-consumer contract of
// begin_write/begin_read is upheld.
unsafe impl Send for ByteQueue {}
unsafe impl Sync for ByteQueue {}

impl ByteQueue {
    /// Creates a queue holding up to `capacity - 1` unread bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is smaller than 2.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity >= 2, "capacity must be at least 2");

        let buffer: Vec<UnsafeCell<u8>> = (0..capacity).map(|_| UnsafeCell::new(0)).collect();

        Self {
            buffer: buffer.into_boxed_slice(),
            write: CachePadded::new(AtomicUsize::new(0)),
            read: CachePadded::new(AtomicUsize::new(0)),
            data_end: AtomicUsize::new(capacity),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no published bytes are waiting.
    ///
    /// A snapshot; may be stale the moment it returns.
    pub fn is_empty(&self) -> bool {
        self.read.load(Ordering::Relaxed) == self.write.load(Ordering::Relaxed)
    }

    /// Reserves a contiguous writable region of exactly `n` bytes.
    ///
    /// Returns `None` when the free space cannot hold `n` contiguous bytes;
    /// this is the queue's only backpressure signal. Nothing is published
    /// until [`WriteGrant::commit`]; a dropped grant publishes nothing.
    ///
    /// Must only be called by the single producer thread.
    pub fn begin_write(&self, n: usize) -> Option<WriteGrant<'_>> {
        let capacity = self.capacity();
        if n == 0 || n >= capacity {
            return None;
        }

        let w = self.write.load(Ordering::Relaxed);
        let r = self.read.load(Ordering::Acquire);

        let (start, wrap_from) = if w >= r {
            let tail_room = capacity - w;
            if tail_room > n || (tail_room == n && r > 0) {
                (w, None)
            } else if r > n {
                // Tail segment too small: pad it out and place the grant at
                // the front. `r > n` keeps the new write position short of
                // the read position.
                (0, Some(w))
            } else {
                return None;
            }
        } else if r - w > n {
            (w, None)
        } else {
            return None;
        };

        Some(WriteGrant {
            queue: self,
            start,
            len: n,
            wrap_from,
        })
    }

    fn end_write(&self, start: usize, written: usize, wrap_from: Option<usize>) {
        if written == 0 {
            return;
        }

        let new_write = match wrap_from {
            Some(tail_end) => {
                self.data_end.store(tail_end, Ordering::Relaxed);
                written
            }
            None => {
                let mut next = start + written;
                if next == self.capacity() {
                    self.data_end.store(next, Ordering::Relaxed);
                    next = 0;
                }
                next
            }
        };

        // Publishes the payload bytes and the data-end marker.
        self.write.store(new_write, Ordering::Release);
    }

    /// Takes all currently published bytes as up to two slices in queue
    /// order; the second is non-empty only when the region wraps the ring
    /// end. The bytes stay claimed until [`ReadBatch::release`].
    ///
    /// Must only be called by the single consumer thread, and not while a
    /// previous batch is still alive.
    pub fn begin_read(&self) -> ReadBatch<'_> {
        let w = self.write.load(Ordering::Acquire);
        let r = self.read.load(Ordering::Relaxed);

        let (first, second) = if r <= w {
            (self.slice(r, w), self.slice(0, 0))
        } else {
            let data_end = self.data_end.load(Ordering::Relaxed);
            (self.slice(r, data_end), self.slice(0, w))
        };

        ReadBatch {
            queue: self,
            first,
            second,
            next_read: w,
        }
    }

    /// # Safety contract (internal)
    ///
    /// `[from, to)` must be a published-and-unreleased or reserved region, so
    /// the other side never accesses it while the slice is alive.
    fn slice(&self, from: usize, to: usize) -> &[u8] {
        debug_assert!(from <= to && to <= self.capacity());
        unsafe { std::slice::from_raw_parts(self.buffer.as_ptr().add(from).cast::<u8>(), to - from) }
    }
}

impl std::fmt::Debug for ByteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteQueue")
            .field("capacity", &self.capacity())
            .field("write", &self.write.load(Ordering::Relaxed))
            .field("read", &self.read.load(Ordering::Relaxed))
            .finish()
    }
}

/// A reserved contiguous region of the queue, writable through `DerefMut`.
///
/// Publish with [`commit`](WriteGrant::commit); dropping the grant abandons
/// the reservation without publishing anything.
pub struct WriteGrant<'a> {
    queue: &'a ByteQueue,
    start: usize,
    len: usize,
    wrap_from: Option<usize>,
}

impl WriteGrant<'_> {
    /// Publishes the first `written` bytes of the region to the consumer.
    ///
    /// # Panics
    ///
    /// Panics if `written` exceeds the reserved length.
    pub fn commit(self, written: usize) {
        assert!(written <= self.len, "commit beyond reserved region");
        self.queue.end_write(self.start, written, self.wrap_from);
    }
}

impl std::ops::Deref for WriteGrant<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.queue.slice(self.start, self.start + self.len)
    }
}

impl std::ops::DerefMut for WriteGrant<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: the region was reserved for this grant; the consumer will
        // not read it before commit publishes the write index.
        unsafe {
            let base = self.queue.buffer.as_ptr().add(self.start);
            std::slice::from_raw_parts_mut((*base).get(), self.len)
        }
    }
}

/// All bytes published at `begin_read` time, as up to two slices.
pub struct ReadBatch<'a> {
    queue: &'a ByteQueue,
    first: &'a [u8],
    second: &'a [u8],
    next_read: usize,
}

impl<'a> ReadBatch<'a> {
    #[inline]
    pub fn first(&self) -> &'a [u8] {
        self.first
    }

    #[inline]
    pub fn second(&self) -> &'a [u8] {
        self.second
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.first.is_empty() && self.second.is_empty()
    }

    /// Releases every byte of the batch back to the producer.
    /// Partial release is not supported.
    pub fn release(self) {
        self.queue.read.store(self.next_read, Ordering::Release);
    }
}
