//! Block-sized byte buffers holding 4-byte IEEE-754 samples in a configurable byte order.

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

#[cfg(test)]
mod sample_tests;

/// Size in bytes of one stored sample.
pub const ELEMENT_SIZE: usize = 4;

/// ByteOrder selects how samples are encoded on disk.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    #[inline]
    #[must_use]
    /// `read_f32` decodes the sample starting at `bytes[0]`.
    pub fn read_f32(self, bytes: &[u8]) -> f32 {
        match self {
            Self::Big => BigEndian::read_f32(bytes),
            Self::Little => LittleEndian::read_f32(bytes),
        }
    }

    #[inline]
    /// `write_f32` encodes `value` into `bytes[..4]`.
    pub fn write_f32(self, bytes: &mut [u8], value: f32) {
        match self {
            Self::Big => BigEndian::write_f32(bytes, value),
            Self::Little => LittleEndian::write_f32(bytes, value),
        }
    }

    #[inline]
    pub fn write_i32(self, bytes: &mut [u8], value: i32) {
        match self {
            Self::Big => BigEndian::write_i32(bytes, value),
            Self::Little => LittleEndian::write_i32(bytes, value),
        }
    }

    #[inline]
    #[must_use]
    pub fn read_i32(self, bytes: &[u8]) -> i32 {
        match self {
            Self::Big => BigEndian::read_i32(bytes),
            Self::Little => LittleEndian::read_i32(bytes),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
/// BlockBuf stores the raw bytes of one cached block plus a dirty marker.
pub struct BlockBuf {
    bytes: Box<[u8]>,
    dirty: bool,
}

impl BlockBuf {
    #[must_use]
    /// `zeroed` returns a clean buffer of `len` zero bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len].into_boxed_slice(),
            dirty: false,
        }
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
            dirty: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    /// `as_bytes_mut` exposes the backing storage without touching the dirty flag.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    #[must_use]
    /// Number of samples held by the buffer.
    pub fn samples(&self) -> usize {
        self.bytes.len() / ELEMENT_SIZE
    }

    #[inline]
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub const fn mark_clean(&mut self) {
        self.dirty = false;
    }

    #[inline]
    #[must_use]
    /// `get_f32` returns the sample at `point` (an intra-block point offset).
    ///
    /// # Panics
    /// Panics if `point` lies outside the buffer.
    pub fn get_f32(&self, point: usize, order: ByteOrder) -> f32 {
        let at = point * ELEMENT_SIZE;
        order.read_f32(&self.bytes[at..at + ELEMENT_SIZE])
    }

    #[inline]
    /// `set_f32` stores `value` at `point` and marks the buffer dirty.
    ///
    /// # Panics
    /// Panics if `point` lies outside the buffer.
    pub fn set_f32(&mut self, point: usize, value: f32, order: ByteOrder) {
        let at = point * ELEMENT_SIZE;
        order.write_f32(&mut self.bytes[at..at + ELEMENT_SIZE], value);
        self.dirty = true;
    }

    /// `sum` adds up every sample in the buffer.
    #[must_use]
    pub fn sum(&self, order: ByteOrder) -> f64 {
        self.bytes
            .chunks_exact(ELEMENT_SIZE)
            .map(|c| f64::from(order.read_f32(c)))
            .sum()
    }
}
