//! Translation between block offsets and raw memory.
//!
//! Everything above this module speaks in offsets from the heap region base;
//! this is where those offsets become pointers, headers get written and read,
//! and payload bytes get copied or cleared.

use std::ptr::{self, NonNull};

use crate::{
  align::{ALIGNMENT, checked_align},
  block::{HEADER_SIZE, Header},
  error::OsError,
  os::Os,
};

/// The break-backed memory all directory blocks live in.
///
/// Offsets are relative to `base`. Bytes other code took from the break sit
/// in gaps between blocks and are never handed out.
pub(crate) struct HeapRegion {
  base: NonNull<u8>,
  committed: usize,
}

// The region is only reachable through the heap that owns it.
unsafe impl Send for HeapRegion {}

impl HeapRegion {
  pub const fn new() -> Self {
    Self {
      base: NonNull::dangling(),
      committed: 0,
    }
  }

  pub fn is_reserved(&self) -> bool {
    self.committed != 0
  }

  /// Bytes obtained from the OS so far.
  pub fn committed(&self) -> usize {
    self.committed
  }

  /// First touch: grabs one slab and anchors the region at its first
  /// aligned byte.
  pub fn reserve<O: Os>(
    &mut self,
    os: &mut O,
    slab_size: usize,
  ) -> Result<(), OsError> {
    debug_assert!(!self.is_reserved());
    debug_assert!(slab_size >= ALIGNMENT);

    let top = os.extend_heap(slab_size)?;
    let padding = top.as_ptr().align_offset(ALIGNMENT);
    let base = unsafe { top.add(padding) };

    log::debug!("heap region reserved: base = {:?}, slab = {} bytes", base, slab_size);

    self.base = base;
    self.committed = slab_size - padding;
    Ok(())
  }

  /// Backs `len` bytes starting at `offset`, extending the break by the
  /// shortfall, and returns the offset the bytes actually start at.
  ///
  /// That is `offset` unless some other `sbrk` user moved the break since the
  /// last extension: the span then starts at the first aligned offset past
  /// their bytes, and everything in between is left alone.
  pub fn ensure<O: Os>(
    &mut self,
    os: &mut O,
    offset: usize,
    len: usize,
  ) -> Result<usize, OsError> {
    let mut start = offset;

    loop {
      let end = start.checked_add(len).ok_or_else(|| too_large(len))?;
      if end <= self.committed {
        return Ok(start);
      }

      let shortfall = end - self.committed;
      let top = os.extend_heap(shortfall)?.as_ptr() as usize;
      let base = self.base.as_ptr() as usize;
      let expected = base + self.committed;

      if top == expected {
        log::debug!("heap region extended by {} bytes to {}", shortfall, end);
        self.committed = end;
        return Ok(start);
      }
      if top < expected {
        return Err(OsError::BreakMovedBack { expected, actual: top });
      }

      log::debug!("break moved by {} foreign bytes, skipping past them", top - expected);

      let top_offset = top - base;
      self.committed = top_offset + shortfall;
      start = checked_align(top_offset).ok_or_else(|| too_large(len))?;
    }
  }

  /// Payload pointer of the block whose header sits at `offset`.
  pub fn payload(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    debug_assert!(offset + HEADER_SIZE <= self.committed);
    unsafe { self.base.add(offset + HEADER_SIZE) }
  }

  /// Header offset of a payload pointer, if it can belong to this region.
  pub fn offset_of(
    &self,
    payload: NonNull<u8>,
  ) -> Option<usize> {
    let base = self.base.as_ptr() as usize;
    let addr = payload.as_ptr() as usize;

    if !self.is_reserved() || addr < base + HEADER_SIZE || addr >= base + self.committed {
      return None;
    }

    let offset = addr - base - HEADER_SIZE;
    (offset % ALIGNMENT == 0).then_some(offset)
  }

  pub fn write_header(
    &mut self,
    offset: usize,
    header: Header,
  ) {
    assert!(offset + HEADER_SIZE <= self.committed, "header past the committed region");
    unsafe { self.base.add(offset).cast::<Header>().write(header) };
  }

  pub fn read_header(
    &self,
    offset: usize,
  ) -> Option<Header> {
    if offset + HEADER_SIZE > self.committed {
      return None;
    }
    Some(unsafe { self.base.add(offset).cast::<Header>().read() })
  }
}

/// Maps a fresh block with room for `size` payload bytes and returns its payload.
pub(crate) fn map_block<O: Os>(
  os: &mut O,
  size: usize,
) -> Result<NonNull<u8>, OsError> {
  let len = mapping_len(size)?;
  let base = os.map_anonymous(len)?;

  unsafe {
    base.cast::<Header>().write(Header::mapped(size));
    Ok(base.add(HEADER_SIZE))
  }
}

/// Unmaps a block created by [`map_block`].
///
/// # Safety
///
/// `payload` must come from [`map_block`] with the same `size` and must not be
/// used afterwards.
pub(crate) unsafe fn unmap_block<O: Os>(
  os: &mut O,
  payload: NonNull<u8>,
  size: usize,
) -> Result<(), OsError> {
  let len = mapping_len(size)?;
  unsafe { os.unmap(payload.sub(HEADER_SIZE), len) }
}

fn mapping_len(size: usize) -> Result<usize, OsError> {
  size.checked_add(HEADER_SIZE).ok_or_else(|| OsError::Map {
    len: size,
    source: std::io::Error::from_raw_os_error(libc::ENOMEM),
  })
}

fn too_large(len: usize) -> OsError {
  OsError::ExtendHeap {
    increment: len,
    source: std::io::Error::from_raw_os_error(libc::ENOMEM),
  }
}

/// Copies `len` payload bytes between two distinct blocks.
///
/// # Safety
///
/// Both ranges must be valid for `len` bytes and must not overlap.
pub(crate) unsafe fn copy_payload(
  src: NonNull<u8>,
  dst: NonNull<u8>,
  len: usize,
) {
  unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), len) };
}

/// # Safety
///
/// `payload` must be valid for writes of `len` bytes.
pub(crate) unsafe fn zero_payload(
  payload: NonNull<u8>,
  len: usize,
) {
  unsafe { ptr::write_bytes(payload.as_ptr(), 0, len) };
}
