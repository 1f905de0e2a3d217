//! Bump allocator over the interpreter's single byte buffer
//!
//! Every object, property and string the interpreter keeps lives in this
//! one buffer and is addressed by 32-bit byte offsets. The arena never
//! grows: allocation fails when the boundary
//! would pass the capacity, and the caller turns that into a language-level
//! error. Only the reclaimer ever moves the boundary backwards.

use crate::value::Offset;

/// Round up to the 4-byte alignment every entity starts on.
#[inline]
pub const fn align4(n: u32) -> u32 {
    (n + 3) & !3
}

/// The fixed-size memory region backing one interpreter instance.
///
/// Reads and writes are bounds-checked against the current allocation
/// boundary; touching bytes past it is a programming error, not a
/// recoverable condition, and trips a debug assertion.
pub struct Arena {
    buf: Vec<u8>,
    brk: Offset,
}

impl Arena {
    /// Wrap a caller-supplied buffer. The caller (see
    /// [`Context`](crate::Context)) has already validated the size.
    pub(crate) fn from_buffer(mut buf: Vec<u8>) -> Arena {
        buf.fill(0);
        Arena { buf, brk: 0 }
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> Offset {
        self.buf.len() as Offset
    }

    /// Current allocation boundary: every offset below it is live or
    /// garbage, everything at or above it is free.
    #[inline]
    pub fn brk(&self) -> Offset {
        self.brk
    }

    /// Move the boundary. Used by the scope fast path (rollback to a
    /// pre-block mark) and by the reclaimer after compaction.
    #[inline]
    pub(crate) fn set_brk(&mut self, brk: Offset) {
        debug_assert!(brk <= self.capacity());
        self.brk = brk;
    }

    /// Bump-allocate `size` bytes, rounded up to a 4-byte boundary.
    ///
    /// Returns `None` when the arena is exhausted; never aborts.
    pub fn alloc(&mut self, size: u32) -> Option<Offset> {
        let size = align4(size);
        if size > self.capacity() - self.brk {
            return None;
        }
        let off = self.brk;
        self.brk += size;
        Some(off)
    }

    #[inline]
    fn check(&self, off: Offset, len: u32) {
        debug_assert!(
            off + len <= self.brk,
            "arena access {off}+{len} past boundary {}",
            self.brk
        );
    }

    #[inline]
    pub fn get_u32(&self, off: Offset) -> u32 {
        self.check(off, 4);
        let b = &self.buf[off as usize..off as usize + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    #[inline]
    pub fn put_u32(&mut self, off: Offset, v: u32) {
        self.check(off, 4);
        self.buf[off as usize..off as usize + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn get_u64(&self, off: Offset) -> u64 {
        self.check(off, 8);
        let b = &self.buf[off as usize..off as usize + 8];
        u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    }

    #[inline]
    pub fn put_u64(&mut self, off: Offset, v: u64) {
        self.check(off, 8);
        self.buf[off as usize..off as usize + 8].copy_from_slice(&v.to_le_bytes());
    }

    /// A view of raw bytes, borrowed only for the duration of one
    /// operation. Never hold this across an allocation or a reclamation.
    #[inline]
    pub fn bytes(&self, off: Offset, len: u32) -> &[u8] {
        self.check(off, len);
        &self.buf[off as usize..(off + len) as usize]
    }

    #[inline]
    pub fn put_bytes(&mut self, off: Offset, data: &[u8]) {
        self.check(off, data.len() as u32);
        self.buf[off as usize..off as usize + data.len()].copy_from_slice(data);
    }

    /// Slide a region down during compaction. Ranges may overlap.
    pub(crate) fn copy_within(&mut self, src: Offset, dst: Offset, len: u32) {
        debug_assert!(dst <= src && src + len <= self.brk);
        self.buf
            .copy_within(src as usize..(src + len) as usize, dst as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align4() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(5), 8);
        assert_eq!(align4(15), 16);
    }

    #[test]
    fn test_alloc_bumps_aligned() {
        let mut a = Arena::from_buffer(vec![0; 64]);
        assert_eq!(a.alloc(5), Some(0));
        assert_eq!(a.brk(), 8);
        assert_eq!(a.alloc(8), Some(8));
        assert_eq!(a.brk(), 16);
    }

    #[test]
    fn test_alloc_exhaustion_fails_cleanly() {
        let mut a = Arena::from_buffer(vec![0; 16]);
        assert_eq!(a.alloc(12), Some(0));
        assert_eq!(a.alloc(8), None);
        // The boundary did not move on failure.
        assert_eq!(a.brk(), 12);
        assert_eq!(a.alloc(4), Some(12));
    }

    #[test]
    fn test_word_round_trips() {
        let mut a = Arena::from_buffer(vec![0; 32]);
        let off = a.alloc(16).unwrap();
        a.put_u32(off, 0xdead_beef);
        a.put_u64(off + 8, 0x0123_4567_89ab_cdef);
        assert_eq!(a.get_u32(off), 0xdead_beef);
        assert_eq!(a.get_u64(off + 8), 0x0123_4567_89ab_cdef);
    }

    #[test]
    fn test_bytes_view() {
        let mut a = Arena::from_buffer(vec![0; 32]);
        let off = a.alloc(8).unwrap();
        a.put_bytes(off, b"hello");
        assert_eq!(a.bytes(off, 5), b"hello");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn test_read_past_boundary_panics() {
        let a = Arena::from_buffer(vec![0; 32]);
        let _ = a.get_u32(0); // nothing allocated yet
    }
}
