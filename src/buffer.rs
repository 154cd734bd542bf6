//! Segmented byte buffers.
//!
//! [`Writer`] appends into fixed-size segments rented from an optional, caller-owned
//! [`BufferPool`]. [`Reader`] walks a sequence of segments with an explicit cursor and
//! implements [`bytes::Buf`], so anything written against `Buf` (such as the varint codec)
//! reads from it directly.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

use crate::{varint, Error, Result};

/// A pool of reusable write segments.
///
/// There is no process-wide default pool; callers create one and hand it to the writers that
/// should share it.
#[derive(Debug)]
pub struct BufferPool {
    segment_size: usize,
    max_retained: usize,
    free: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub const DEFAULT_SEGMENT_SIZE: usize = 4096;
    const DEFAULT_MAX_RETAINED: usize = 64;

    pub fn new(segment_size: usize) -> Self {
        Self {
            segment_size: segment_size.max(16),
            max_retained: Self::DEFAULT_MAX_RETAINED,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Caps how many idle segments the pool keeps around.
    pub fn with_max_retained(mut self, max_retained: usize) -> Self {
        self.max_retained = max_retained;
        self
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Number of idle segments currently held.
    pub fn retained(&self) -> usize {
        self.free.lock().len()
    }

    /// Returns an empty segment with room for at least `min_capacity` bytes.
    pub fn rent(&self, min_capacity: usize) -> BytesMut {
        if min_capacity <= self.segment_size {
            if let Some(segment) = self.free.lock().pop() {
                return segment;
            }
        }
        BytesMut::with_capacity(self.segment_size.max(min_capacity))
    }

    /// Returns a segment to the pool. Oversized or surplus segments are dropped.
    pub fn give_back(&self, mut segment: BytesMut) {
        segment.clear();
        if segment.capacity() < self.segment_size {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.max_retained {
            free.push(segment);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEGMENT_SIZE)
    }
}

/// Append-only writer over a segmented backing store.
///
/// Fixed-width values are little-endian. Writing never fails; the only limit is addressable
/// memory.
#[derive(Debug)]
pub struct Writer {
    pool: Option<Arc<BufferPool>>,
    segment_size: usize,
    current: BytesMut,
    completed: Vec<BytesMut>,
    completed_len: usize,
}

impl Writer {
    pub fn new() -> Self {
        Self::with_segment_size(BufferPool::DEFAULT_SEGMENT_SIZE)
    }

    pub fn with_segment_size(segment_size: usize) -> Self {
        Self {
            pool: None,
            segment_size: segment_size.max(16),
            current: BytesMut::new(),
            completed: Vec::new(),
            completed_len: 0,
        }
    }

    pub fn with_pool(pool: Arc<BufferPool>) -> Self {
        Self {
            segment_size: pool.segment_size(),
            pool: Some(pool),
            current: BytesMut::new(),
            completed: Vec::new(),
            completed_len: 0,
        }
    }

    /// Total number of bytes written so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.completed_len + self.current.len()
    }

    /// Number of segments the output currently spans.
    pub fn segment_count(&self) -> usize {
        self.completed.len() + usize::from(!self.current.is_empty())
    }

    fn rent(&self, min_capacity: usize) -> BytesMut {
        match &self.pool {
            Some(pool) => pool.rent(min_capacity),
            None => BytesMut::with_capacity(self.segment_size.max(min_capacity)),
        }
    }

    /// Makes sure the next `len` bytes fit contiguously in the current segment.
    fn ensure_contiguous(&mut self, len: usize) {
        if self.current.capacity() - self.current.len() >= len {
            return;
        }
        if self.current.is_empty() {
            let fresh = self.rent(len);
            let old = std::mem::replace(&mut self.current, fresh);
            if let Some(pool) = &self.pool {
                pool.give_back(old);
            }
            return;
        }
        let next = self.rent(len);
        let full = std::mem::replace(&mut self.current, next);
        self.completed_len += full.len();
        self.completed.push(full);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.ensure_contiguous(1);
        self.current.put_u8(value);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.ensure_contiguous(2);
        self.current.put_u16_le(value);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.ensure_contiguous(4);
        self.current.put_u32_le(value);
    }

    pub fn write_u64_le(&mut self, value: u64) {
        self.ensure_contiguous(8);
        self.current.put_u64_le(value);
    }

    pub fn write_u128_le(&mut self, value: u128) {
        self.ensure_contiguous(16);
        self.current.put_u128_le(value);
    }

    pub fn write_f32_le(&mut self, value: f32) {
        self.ensure_contiguous(4);
        self.current.put_f32_le(value);
    }

    pub fn write_f64_le(&mut self, value: f64) {
        self.ensure_contiguous(8);
        self.current.put_f64_le(value);
    }

    /// Appends a raw byte run, spilling across segments as needed.
    pub fn write_bytes(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let available = self.current.capacity() - self.current.len();
            if available == 0 {
                self.ensure_contiguous(bytes.len().min(self.segment_size));
                continue;
            }
            let n = available.min(bytes.len());
            self.current.extend_from_slice(&bytes[..n]);
            bytes = &bytes[n..];
        }
    }

    pub fn write_var_u32(&mut self, value: u32) {
        self.ensure_contiguous(varint::MAX_VARINT_LEN);
        varint::write(value, &mut self.current);
    }

    pub fn write_var_u64(&mut self, value: u64) {
        self.ensure_contiguous(varint::MAX_VARINT_LEN);
        varint::write(value, &mut self.current);
    }

    pub fn write_var_i32(&mut self, value: i32) {
        self.ensure_contiguous(varint::MAX_VARINT_LEN);
        varint::write_signed(value, &mut self.current);
    }

    pub fn write_var_i64(&mut self, value: i64) {
        self.ensure_contiguous(varint::MAX_VARINT_LEN);
        varint::write_signed(value, &mut self.current);
    }

    /// Writes `VarInt(len) ++ bytes`.
    pub fn write_length_prefixed(&mut self, bytes: &[u8]) {
        self.write_var_u32(bytes.len() as u32);
        self.write_bytes(bytes);
    }

    /// Consumes the writer, returning each non-empty segment without copying.
    pub fn into_segments(self) -> Vec<Bytes> {
        let mut segments: Vec<Bytes> = self.completed.into_iter().map(BytesMut::freeze).collect();
        if !self.current.is_empty() {
            segments.push(self.current.freeze());
        }
        segments
    }

    /// Consumes the writer, returning the output as one contiguous buffer.
    ///
    /// Multi-segment output is copied once; the segments go back to the pool.
    pub fn into_bytes(self) -> Bytes {
        if self.completed.is_empty() {
            return self.current.freeze();
        }
        let mut output = BytesMut::with_capacity(self.completed_len + self.current.len());
        for segment in self.completed {
            output.extend_from_slice(&segment);
            if let Some(pool) = &self.pool {
                pool.give_back(segment);
            }
        }
        output.extend_from_slice(&self.current);
        if let Some(pool) = &self.pool {
            pool.give_back(self.current);
        }
        output.freeze()
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// Cursor over a possibly multi-segment byte sequence.
///
/// Cloning is cheap: clones share the segments but keep their own cursor, which is what
/// [`copy`](Reader::copy) and [`fork_at`](Reader::fork_at) rely on.
#[derive(Clone, Debug)]
pub struct Reader {
    segments: Arc<[Bytes]>,
    segment: usize,
    offset: usize,
    position: usize,
    length: usize,
}

impl Reader {
    pub fn new(bytes: Bytes) -> Self {
        Self::from_segments(vec![bytes])
    }

    pub fn from_segments(segments: Vec<Bytes>) -> Self {
        let segments: Arc<[Bytes]> = segments.into_iter().filter(|s| !s.is_empty()).collect();
        let length = segments.iter().map(Bytes::len).sum();
        Self {
            segments,
            segment: 0,
            offset: 0,
            position: 0,
            length,
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.length - self.position
    }

    /// An independent cursor at the same position.
    pub fn copy(&self) -> Reader {
        self.clone()
    }

    /// An independent cursor at an absolute `position`.
    pub fn fork_at(&self, position: usize) -> Result<Reader> {
        let mut fork = self.clone();
        fork.seek(position)?;
        Ok(fork)
    }

    /// Moves the cursor to an absolute `position`.
    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.length {
            return Err(Error::InsufficientData {
                needed: position,
                remaining: self.length,
            });
        }
        self.segment = 0;
        self.offset = 0;
        self.position = 0;
        self.advance(position);
        Ok(())
    }

    #[inline]
    fn ensure(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(Error::InsufficientData {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.ensure(len)?;
        self.advance(len);
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.get_u8())
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.get_u16_le())
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.get_u32_le())
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.get_u64_le())
    }

    pub fn read_u128_le(&mut self) -> Result<u128> {
        self.ensure(16)?;
        Ok(self.get_u128_le())
    }

    pub fn read_f32_le(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.get_f32_le())
    }

    pub fn read_f64_le(&mut self) -> Result<f64> {
        self.ensure(8)?;
        Ok(self.get_f64_le())
    }

    /// Reads `len` raw bytes.
    ///
    /// When the span lies inside the current segment the result is a zero-copy slice of it;
    /// otherwise the span is gathered into a scratch buffer.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        if len == 0 {
            return Ok(Bytes::new());
        }
        let current = &self.segments[self.segment];
        if current.len() - self.offset >= len {
            let slice = current.slice(self.offset..self.offset + len);
            self.advance(len);
            return Ok(slice);
        }
        let mut scratch = BytesMut::with_capacity(len);
        scratch.resize(len, 0);
        self.copy_to_slice(&mut scratch);
        Ok(scratch.freeze())
    }

    /// Whether the next `len` bytes are contiguous in the current segment.
    pub fn is_contiguous(&self, len: usize) -> bool {
        self.chunk().len() >= len
    }

    pub fn read_var_u32(&mut self) -> Result<u32> {
        varint::read(self)
    }

    pub fn read_var_u64(&mut self) -> Result<u64> {
        varint::read(self)
    }

    pub fn read_var_i32(&mut self) -> Result<i32> {
        varint::read_signed(self)
    }

    pub fn read_var_i64(&mut self) -> Result<i64> {
        varint::read_signed(self)
    }

    /// Reads `VarInt(len) ++ bytes`.
    pub fn read_length_prefixed(&mut self) -> Result<Bytes> {
        let len = self.read_var_u32()? as usize;
        self.read_bytes(len)
    }
}

impl Buf for Reader {
    fn remaining(&self) -> usize {
        self.length - self.position
    }

    fn chunk(&self) -> &[u8] {
        match self.segments.get(self.segment) {
            Some(segment) => &segment[self.offset..],
            None => &[],
        }
    }

    fn advance(&mut self, mut cnt: usize) {
        assert!(
            cnt <= Buf::remaining(self),
            "cannot advance past the end of the reader"
        );
        while cnt > 0 {
            let available = self.segments[self.segment].len() - self.offset;
            if cnt < available {
                self.offset += cnt;
                self.position += cnt;
                return;
            }
            cnt -= available;
            self.position += available;
            self.segment += 1;
            self.offset = 0;
        }
    }
}

impl From<Bytes> for Reader {
    fn from(bytes: Bytes) -> Self {
        Reader::new(bytes)
    }
}

impl From<Vec<u8>> for Reader {
    fn from(bytes: Vec<u8>) -> Self {
        Reader::new(Bytes::from(bytes))
    }
}

impl From<Vec<Bytes>> for Reader {
    fn from(segments: Vec<Bytes>) -> Self {
        Reader::from_segments(segments)
    }
}

impl From<Writer> for Reader {
    fn from(writer: Writer) -> Self {
        Reader::from_segments(writer.into_segments())
    }
}
