use crate::align::{ALIGNMENT, checked_align};

/// Requests of at least this many bytes bypass the heap region.
pub const MMAP_THRESHOLD: usize = 128 * 1024;

/// Size of the slab reserved on the first heap-backed request.
pub const SLAB_SIZE: usize = 128 * 1024;

/// Tunables of a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Rounded sizes at or above this are served by an independent mapping.
  pub mmap_threshold: usize,
  /// Bytes requested from the OS when the heap region is first touched.
  pub slab_size: usize,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      mmap_threshold: MMAP_THRESHOLD,
      slab_size: SLAB_SIZE,
    }
  }
}

impl HeapConfig {
  pub fn with_mmap_threshold(
    mut self,
    threshold: usize,
  ) -> Self {
    self.mmap_threshold = checked_align(threshold).unwrap_or(usize::MAX & !(ALIGNMENT - 1));
    self
  }

  pub fn with_slab_size(
    mut self,
    slab_size: usize,
  ) -> Self {
    self.slab_size = checked_align(slab_size)
      .unwrap_or(usize::MAX & !(ALIGNMENT - 1))
      .max(ALIGNMENT);
    self
  }
}
