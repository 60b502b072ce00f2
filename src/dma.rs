use crate::BoardError;
use std::{
    alloc::{self, Layout},
    ptr::NonNull,
    slice,
};

/// Size of a memory page on this host.
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as usize;
        }
    }
    4096
}

/// A page-aligned host buffer the board writes samples into.
///
/// The buffer owns its memory and frees it when dropped. The board only ever
/// sees a raw pointer while the buffer is posted; the acquisition engine keeps
/// the owning value alive for the whole run.
#[derive(Debug)]
pub struct DmaBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    slot: usize,
}

// The memory is exclusively owned by this value.
unsafe impl Send for DmaBuffer {}

impl DmaBuffer {
    /// Allocate a zeroed, page-aligned buffer of `len` bytes for pool slot `slot`.
    pub fn new(slot: usize, len: usize) -> Result<Self, BoardError> {
        if len == 0 {
            return Err(BoardError::Allocation { bytes: len });
        }
        let layout = Layout::from_size_align(len, page_size())
            .map_err(|_| BoardError::Allocation { bytes: len })?;
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(BoardError::Allocation { bytes: len })?;
        Ok(Self { ptr, layout, slot })
    }

    /// Index of this buffer in the pool.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }

    /// Address handed to the board when the buffer is posted.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
