//! Fixed capacity byte ring.

use bytes::{Bytes, BytesMut};

/// A byte ring over a fixed allocation. Content wraps around the end.
#[derive(Debug)]
pub(crate) struct RingBuffer {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
}

impl RingBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity.max(1)].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// Copies as much of `src` as fits, returning the count.
    pub(crate) fn write(&mut self, src: &[u8]) -> usize {
        let count = src.len().min(self.remaining());
        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        let first = count.min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&src[..first]);
        self.buf[..count - first].copy_from_slice(&src[first..count]);
        self.len += count;
        count
    }

    /// Moves up to `dst.len()` bytes out, returning the count.
    pub(crate) fn read(&mut self, dst: &mut [u8]) -> usize {
        let count = dst.len().min(self.len);
        let cap = self.capacity();
        let first = count.min(cap - self.head);
        dst[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        dst[first..count].copy_from_slice(&self.buf[..count - first]);
        self.head = (self.head + count) % cap;
        self.len -= count;
        if self.len == 0 {
            self.head = 0;
        }
        count
    }

    /// Moves up to `max` bytes out into a fresh `Bytes`.
    pub(crate) fn take(&mut self, max: usize) -> Bytes {
        let mut out = BytesMut::zeroed(max.min(self.len));
        let count = self.read(&mut out);
        out.truncate(count);
        out.freeze()
    }

    pub(crate) fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
