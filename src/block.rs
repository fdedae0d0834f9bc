use std::mem;

/// Allocation state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
  Free,
  HeapAllocated,
  MappedAllocated,
}

impl Status {
  pub fn is_free(self) -> bool {
    matches!(self, Status::Free)
  }
}

/// Index of a block record inside the directory arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
  pub(crate) fn index(self) -> usize {
    self.0 as usize
  }
}

/// Bookkeeping for one contiguous chunk of the heap region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
  /// Offset of the header from the heap region base.
  pub offset: usize,
  /// Usable payload bytes, header excluded.
  pub size: usize,
  pub status: Status,
  pub prev: Option<BlockId>,
  pub next: Option<BlockId>,
}

impl Block {
  pub fn new(
    offset: usize,
    size: usize,
    status: Status,
  ) -> Self {
    Self {
      offset,
      size,
      status,
      prev: None,
      next: None,
    }
  }

  /// Offset of the first byte past this block's payload.
  pub fn end(&self) -> usize {
    self.offset + HEADER_SIZE + self.size
  }
}

/// Tag stored in [`Header::kind`] for blocks living in the heap region.
pub(crate) const HEAP_KIND: u32 = 0x6865_6170;
/// Tag stored in [`Header::kind`] for independently mapped blocks.
pub(crate) const MAPPED_KIND: u32 = 0x6d6d_6170;

/// The header written immediately before every payload.
///
/// The directory is authoritative for heap blocks; the header only lets a
/// payload pointer find its record again.
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
  pub size: usize,
  pub slot: u32,
  pub kind: u32,
}

impl Header {
  pub fn heap(
    size: usize,
    id: BlockId,
  ) -> Self {
    Self {
      size,
      slot: id.0,
      kind: HEAP_KIND,
    }
  }

  pub fn mapped(size: usize) -> Self {
    Self {
      size,
      slot: u32::MAX,
      kind: MAPPED_KIND,
    }
  }
}

/// Bytes reserved in front of every payload.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

const _: () = assert!(HEADER_SIZE % crate::align::ALIGNMENT == 0);
