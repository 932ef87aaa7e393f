//! An owned region of executable memory that generated code is appended to.

use std::{io, ptr::NonNull, sync::atomic};

#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("failed to map {size:#x} bytes of executable memory: {source}")]
    Map { size: usize, source: io::Error },
    #[error("cannot allocate an empty code arena")]
    Empty,
}

/// A fixed-size read/write/execute mapping with an append cursor.
///
/// Writes never land outside the region that was handed out by [`CodeBuffer::reserve`]: anything
/// that would is dropped and remembered as an overflow, which the owner must check before the
/// written code is allowed to run.
pub struct CodeBuffer {
    ptr: NonNull<u8>,
    capacity: usize,
    len: usize,
    limit: usize,
    overflowed: bool,
}

impl CodeBuffer {
    pub fn new(capacity: usize) -> Result<Self, ArenaError> {
        if capacity == 0 {
            return Err(ArenaError::Empty);
        }

        // SAFETY: anonymous private mapping, no file descriptor or fixed address is involved.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(ArenaError::Map {
                size: capacity,
                source: io::Error::last_os_error(),
            });
        }

        Ok(Self {
            ptr: NonNull::new(ptr.cast()).ok_or(ArenaError::Map {
                size: capacity,
                source: io::Error::from(io::ErrorKind::OutOfMemory),
            })?,
            capacity,
            len: 0,
            limit: capacity,
            overflowed: false,
        })
    }

    /// The offset the next byte will be written to.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn space_left(&self) -> usize {
        self.capacity - self.len
    }

    /// Limits upcoming writes to the next `bytes` bytes. Returns false if the arena cannot fit them.
    pub fn reserve(&mut self, bytes: usize) -> bool {
        match self.len.checked_add(bytes) {
            Some(limit) if limit <= self.capacity => {
                self.limit = limit;
                true
            }
            _ => false,
        }
    }

    pub fn emit(&mut self, bytes: &[u8]) {
        if self.overflowed || self.len + bytes.len() > self.limit {
            self.overflowed = true;
            return;
        }

        // SAFETY: the range was bounds checked against the reserved limit, which never exceeds the mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr().add(self.len), bytes.len());
        }
        self.len += bytes.len();
    }

    /// Rewrites already emitted bytes. Returns false, without writing anything, if the range was never emitted.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) -> bool {
        match offset.checked_add(bytes.len()) {
            Some(end) if end <= self.len => {
                // SAFETY: the range lies within the written part of the mapping.
                unsafe {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr().add(offset), bytes.len());
                }
                true
            }
            _ => false,
        }
    }

    /// Whether a write was dropped since the last call, clearing the flag.
    pub fn take_overflow(&mut self) -> bool {
        std::mem::take(&mut self.overflowed)
    }

    /// Discards everything written after `offset`.
    pub fn truncate(&mut self, offset: usize) {
        self.len = self.len.min(offset);
    }

    /// Discards all code, making the whole arena available again.
    pub fn reset(&mut self) {
        self.len = 0;
        self.limit = self.capacity;
        self.overflowed = false;
    }

    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        let end = (offset + len).min(self.len);
        let start = offset.min(end);
        // SAFETY: the range lies within the written part of the mapping.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(start), end - start) }
    }

    /// A pointer to executable code at the given offset.
    pub fn ptr(&self, offset: usize) -> *const u8 {
        debug_assert!(offset <= self.capacity);
        // SAFETY: offsets are always within the mapping.
        unsafe { self.ptr.as_ptr().add(offset) }
    }

    /// Makes freshly written code visible to instruction fetch.
    ///
    /// x86 keeps its instruction cache coherent with stores, only reordering by the compiler has to be prevented.
    pub fn flush_icache(&self, _offset: usize, _len: usize) {
        atomic::compiler_fence(atomic::Ordering::SeqCst);
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        // SAFETY: the mapping was created in `new` with this exact size.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.capacity);
        }
    }
}

impl std::fmt::Debug for CodeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_patch() {
        let mut code = CodeBuffer::new(0x1000).unwrap();
        code.emit(&[0x90, 0x90, 0xC3]);
        assert_eq!(code.len(), 3);
        assert!(code.patch(1, &[0xCC]));
        assert_eq!(code.bytes(0, 3), &[0x90, 0xCC, 0xC3]);
    }

    #[test]
    fn patch_outside_written_range() {
        let mut code = CodeBuffer::new(0x1000).unwrap();
        code.emit(&[0x90; 4]);
        assert!(!code.patch(3, &[0xCC, 0xCC]));
        assert!(!code.patch(usize::MAX, &[0xCC]));
        assert_eq!(code.bytes(0, 4), &[0x90; 4]);
    }

    #[test]
    fn writes_past_reservation_are_dropped() {
        let mut code = CodeBuffer::new(0x1000).unwrap();
        assert!(code.reserve(4));
        code.emit(&[1, 2, 3]);
        code.emit(&[4, 5]);
        assert_eq!(code.len(), 3);
        assert!(code.take_overflow());
        assert!(!code.take_overflow());
        assert!(!code.reserve(0x2000));
    }

    #[test]
    fn reset_reclaims_space() {
        let mut code = CodeBuffer::new(0x100).unwrap();
        code.emit(&[0; 0x80]);
        assert_eq!(code.space_left(), 0x80);
        code.reset();
        assert_eq!(code.space_left(), 0x100);
        assert!(code.is_empty());
    }

    #[test]
    fn empty_arena_is_rejected() {
        assert!(matches!(CodeBuffer::new(0), Err(ArenaError::Empty)));
    }
}
