// Byte containers used on the receive and send paths.
//
// A `ByteBuffer` is one fully framed message. A `SliceBuffer` accumulates
// slices while a message is mid-assembly. A `ByteBufferQueue` holds framed
// messages waiting for a matching receive request.

use std::collections::VecDeque;

use bytes::Bytes;

/// A discrete message as a list of byte slices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    slices: Vec<Bytes>,
}

impl ByteBuffer {
    pub fn from_slices(slices: Vec<Bytes>) -> Self {
        Self { slices }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            Self::default()
        } else {
            Self { slices: vec![bytes] }
        }
    }

    pub fn slices(&self) -> &[Bytes] {
        &self.slices
    }

    /// Total payload length across all slices.
    pub fn length(&self) -> usize {
        self.slices.iter().map(Bytes::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Copies the payload into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length());
        for slice in &self.slices {
            out.extend_from_slice(slice);
        }
        out
    }
}

/// Accumulates slices for a message that is still being assembled.
#[derive(Debug, Default)]
pub struct SliceBuffer {
    slices: Vec<Bytes>,
    length: usize,
}

impl SliceBuffer {
    pub fn add(&mut self, slice: Bytes) {
        self.length += slice.len();
        self.slices.push(slice);
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn count(&self) -> usize {
        self.slices.len()
    }

    /// Takes the accumulated slices, resetting the buffer.
    pub fn take(&mut self) -> Vec<Bytes> {
        self.length = 0;
        std::mem::take(&mut self.slices)
    }
}

/// FIFO of assembled messages waiting for delivery.
#[derive(Debug, Default)]
pub struct ByteBufferQueue {
    queue: VecDeque<ByteBuffer>,
}

impl ByteBufferQueue {
    pub fn push(&mut self, buffer: ByteBuffer) {
        self.queue.push_back(buffer);
    }

    pub fn pop(&mut self) -> Option<ByteBuffer> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Drops all queued messages. Used when a non-OK status makes buffered
    /// inbound messages undeliverable.
    pub fn flush(&mut self) {
        self.queue.clear();
    }
}
