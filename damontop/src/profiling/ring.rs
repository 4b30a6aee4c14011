//! Reader side of the perf ring buffer
//!
//! The kernel owns `data_head` and only ever moves it forward; we own
//! `data_tail`. Reads copy out of a power-of-two data area, splitting the copy
//! in two when a record wraps past the end.
//!
//! ```text
//!            tail (reader)            head (kernel)
//!              │                        │
//!   ┌──────────▼────────────────────────▼──────────┐
//!   │ consumed │   pending records      │  free    │
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! [`RingStorage`] abstracts where the cursors and bytes live so the same
//! [`RingReader`] runs against the real mmap and the in-memory [`VecRing`]
//! used in tests.

use crate::domain::RingError;

/// Backing store for a ring: two cursors and a data area
pub trait RingStorage {
    /// Producer cursor. Must be loaded with acquire ordering so record bytes
    /// written before the head update are visible afterwards.
    fn load_head(&self) -> u64;

    /// Consumer cursor
    fn load_tail(&self) -> u64;

    /// Publish a new consumer cursor to the producer
    fn store_tail(&mut self, tail: u64);

    /// Data area; its length is a power of two
    fn data(&self) -> &[u8];
}

/// Sequential reader over a [`RingStorage`]
pub struct RingReader<S> {
    storage: S,
    mask: u64,
}

impl<S: RingStorage> RingReader<S> {
    /// Wrap a storage whose data area length is a power of two
    pub fn new(storage: S) -> Self {
        let len = storage.data().len() as u64;
        debug_assert!(len.is_power_of_two(), "ring size must be a power of two");
        Self { storage, mask: len.saturating_sub(1) }
    }

    /// Bytes published by the producer and not yet consumed
    pub fn available(&self) -> u64 {
        let head = self.storage.load_head();
        head.wrapping_sub(self.storage.load_tail())
    }

    /// Copy exactly `buf.len()` bytes from the tail and advance past them
    ///
    /// # Errors
    /// Returns [`RingError::InsufficientData`] when fewer bytes are pending;
    /// the tail is left untouched in that case.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), RingError> {
        let tail = self.peek(buf)?;
        self.storage.store_tail(tail.wrapping_add(buf.len() as u64));
        Ok(())
    }

    /// Copy `buf.len()` bytes from the tail without consuming them
    ///
    /// Returns the tail the bytes were copied from.
    ///
    /// # Errors
    /// Returns [`RingError::InsufficientData`] when fewer bytes are pending.
    #[allow(clippy::cast_possible_truncation)]
    pub fn peek(&self, buf: &mut [u8]) -> Result<u64, RingError> {
        let head = self.storage.load_head();
        let tail = self.storage.load_tail();
        let available = head.wrapping_sub(tail);
        let n = buf.len();

        if available < n as u64 {
            return Err(RingError::InsufficientData { needed: n, available });
        }

        let data = self.storage.data();
        let offset = (tail & self.mask) as usize;
        let first = (data.len() - offset).min(n);

        buf[..first].copy_from_slice(&data[offset..offset + first]);
        if first < n {
            // Record wrapped past the end of the data area
            buf[first..].copy_from_slice(&data[..n - first]);
        }
        Ok(tail)
    }

    /// Read a little-endian `u32`
    ///
    /// # Errors
    /// See [`RingReader::read`].
    pub fn read_u32(&mut self) -> Result<u32, RingError> {
        let mut buf = [0u8; 4];
        self.read(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a little-endian `u64`
    ///
    /// # Errors
    /// See [`RingReader::read`].
    pub fn read_u64(&mut self) -> Result<u64, RingError> {
        let mut buf = [0u8; 8];
        self.read(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Advance the tail by `n` bytes, never past the head
    pub fn skip(&mut self, n: usize) {
        let head = self.storage.load_head();
        let tail = self.storage.load_tail();
        let step = (n as u64).min(head.wrapping_sub(tail));
        self.storage.store_tail(tail.wrapping_add(step));
    }

    /// Drop everything pending
    pub fn reset(&mut self) {
        let head = self.storage.load_head();
        self.storage.store_tail(head);
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }
}

// =============================================================================
// IN-MEMORY RING
// =============================================================================

/// Heap-backed ring with a producer API, for replaying captured records
#[derive(Debug, Clone)]
pub struct VecRing {
    data: Vec<u8>,
    head: u64,
    tail: u64,
}

impl VecRing {
    /// Create a ring of `size` bytes (rounded up to a power of two)
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self { data: vec![0; size.max(1).next_power_of_two()], head: 0, tail: 0 }
    }

    /// Start both cursors at `offset`, to exercise wraparound
    #[must_use]
    pub fn with_cursor(mut self, offset: u64) -> Self {
        self.head = offset;
        self.tail = offset;
        self
    }

    /// Producer write. Returns `false` (and writes nothing) when the bytes
    /// would overwrite data the reader has not consumed yet.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        let len = self.data.len() as u64;
        let used = self.head.wrapping_sub(self.tail);
        if used + bytes.len() as u64 > len {
            return false;
        }
        let mask = len - 1;
        for (i, byte) in bytes.iter().enumerate() {
            let pos = (self.head.wrapping_add(i as u64) & mask) as usize;
            self.data[pos] = *byte;
        }
        self.head = self.head.wrapping_add(bytes.len() as u64);
        true
    }

    #[must_use]
    pub fn head(&self) -> u64 {
        self.head
    }

    #[must_use]
    pub fn tail(&self) -> u64 {
        self.tail
    }
}

impl RingStorage for VecRing {
    fn load_head(&self) -> u64 {
        self.head
    }

    fn load_tail(&self) -> u64 {
        self.tail
    }

    fn store_tail(&mut self, tail: u64) {
        self.tail = tail;
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}
