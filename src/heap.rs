use std::{collections::HashMap, ptr::NonNull};

use crate::{
  align::checked_align,
  block::{Block, BlockId, HEAP_KIND, HEADER_SIZE, Header, Status},
  config::HeapConfig,
  directory::{BlockDirectory, InvariantViolation},
  error::fatal,
  os::{Os, SystemOs},
  region::{self, HeapRegion},
  resize::{self, FreeNeighbor, Placement, ResizePlan, ResizeRequest},
};

/// Snapshot of one directory block, as returned by [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub payload: NonNull<u8>,
  pub size: usize,
  pub status: Status,
}

/// What a payload pointer turned out to be.
enum Located {
  Mapped(usize),
  Heap(BlockId),
  Free,
  Unknown,
}

/// An allocator context: one heap region, its directory, and the set of
/// independently mapped blocks.
pub struct Heap<O: Os = SystemOs> {
  os: O,
  config: HeapConfig,
  region: HeapRegion,
  directory: BlockDirectory,
  /// Payload address -> payload size of every live mapped block.
  mapped: HashMap<usize, usize>,
}

impl<O: Os> Heap<O> {
  pub fn new(os: O) -> Self {
    Self::with_config(os, HeapConfig::default())
  }

  pub fn with_config(
    os: O,
    config: HeapConfig,
  ) -> Self {
    Self {
      os,
      config,
      region: HeapRegion::new(),
      directory: BlockDirectory::new(),
      mapped: HashMap::new(),
    }
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn os(&self) -> &O {
    &self.os
  }

  pub fn os_mut(&mut self) -> &mut O {
    &mut self.os
  }

  /// Returns at least `size` usable bytes, 8-byte aligned, or `None` for a
  /// zero-sized request.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    if size == 0 {
      return None;
    }
    let size = checked_align(size)?;

    let payload = if size >= self.config.mmap_threshold {
      self.map(size)
    } else {
      self.allocate_heap(size)
    };

    self.debug_check();
    Some(payload)
  }

  /// Like [`Heap::allocate`] for `count * element_size` bytes, zero-filled.
  ///
  /// Anything whose header plus payload exceeds one page is mapped directly,
  /// even when it would fit under the mmap threshold.
  pub fn zeroed_allocate(
    &mut self,
    count: usize,
    element_size: usize,
  ) -> Option<NonNull<u8>> {
    if count == 0 || element_size == 0 {
      return None;
    }
    let total = checked_align(count.checked_mul(element_size)?)?;

    let page_size = self
      .os
      .page_size()
      .unwrap_or_else(|err| fatal("page size query failed", &err));

    let payload = if total.saturating_add(HEADER_SIZE) > page_size {
      self.map(total)
    } else {
      self.allocate(total)?
    };

    unsafe { region::zero_payload(payload, total) };

    self.debug_check();
    Some(payload)
  }

  /// Releases a payload pointer. Null pointers and pointers whose block is
  /// already free are ignored.
  pub fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(payload) = NonNull::new(ptr) else {
      return;
    };

    match self.locate(payload) {
      Located::Mapped(size) => self.unmap(payload, size),
      Located::Heap(id) => {
        self.free_block(id);
      }
      Located::Free | Located::Unknown => {
        log::trace!("release({:?}): not a live block, ignored", payload);
      }
    }

    self.debug_check();
  }

  /// Changes the usable size behind `ptr`, keeping the first
  /// `min(old, new)` bytes. The result may move.
  ///
  /// A null `ptr` allocates; a zero `new_size` releases and returns `None`;
  /// resizing a released block returns `None`.
  pub fn resize(
    &mut self,
    ptr: *mut u8,
    new_size: usize,
  ) -> Option<NonNull<u8>> {
    let Some(payload) = NonNull::new(ptr) else {
      return self.allocate(new_size);
    };

    if new_size == 0 {
      self.release(ptr);
      return None;
    }
    let new_size = checked_align(new_size)?;

    let result = match self.locate(payload) {
      Located::Mapped(old_size) => {
        let request = ResizeRequest {
          old_size,
          new_size,
          placement: Placement::Mapped,
        };
        match resize::plan(&request) {
          ResizePlan::Unchanged => Some(payload),
          _ => self.relocate(payload, old_size, new_size),
        }
      }
      Located::Heap(id) => self.resize_block(id, payload, new_size),
      Located::Free | Located::Unknown => {
        log::trace!("resize({:?}, {}): not a live block", payload, new_size);
        None
      }
    };

    self.debug_check();
    result
  }

  fn allocate_heap(
    &mut self,
    size: usize,
  ) -> NonNull<u8> {
    let id = if !self.region.is_reserved() {
      if let Err(err) = self.region.reserve(&mut self.os, self.config.slab_size) {
        fatal("heap preallocation failed", &err);
      }
      self.append(size)
    } else if let Some(id) = self.directory.best_fit(size) {
      log::trace!("allocate({}): best fit {:?} of {} bytes", size, id, self.directory[id].size);
      self.claim(id, size);
      id
    } else {
      match self.directory.last() {
        Some(last) if self.directory[last].status.is_free() => {
          log::trace!("allocate({}): growing free tail {:?}", size, last);
          self.grow_tail(last, size)
        }
        _ => self.append(size),
      }
    };

    self.region.payload(self.directory[id].offset)
  }

  /// Marks a free block allocated, splitting off the excess when it can
  /// stand as a block of its own.
  fn claim(
    &mut self,
    id: BlockId,
    size: usize,
  ) {
    let leftover = self.directory[id].size - size;
    if resize::can_split(leftover) {
      self.directory[id].size = size;
      self.split_after(id, leftover - HEADER_SIZE);
    }

    self.directory[id].status = Status::HeapAllocated;
    self.stamp(id);
  }

  /// Carves a new block at the top of the heap.
  fn append(
    &mut self,
    size: usize,
  ) -> BlockId {
    let offset = self.directory.last().map_or(0, |last| self.directory[last].end());
    let offset = self.extend(offset, size);

    let id = self.directory.push_back(Block::new(offset, size, Status::HeapAllocated));
    log::trace!("allocate({}): new block {:?} at offset {}", size, id, offset);

    self.stamp(id);
    id
  }

  /// Backs a block of `size` bytes at `offset`, or past whatever another
  /// `sbrk` user took above it. Returns where the block starts.
  fn extend(
    &mut self,
    offset: usize,
    size: usize,
  ) -> usize {
    self
      .region
      .ensure(&mut self.os, offset, HEADER_SIZE + size)
      .unwrap_or_else(|err| fatal("sbrk failed", &err))
  }

  /// Resizes the tail block to exactly `size` bytes and marks it allocated.
  ///
  /// If the break no longer sits where the tail can reach it, the tail is
  /// left untouched and a new allocated block is appended instead. Returns
  /// the block that now holds `size` bytes.
  fn grow_tail(
    &mut self,
    id: BlockId,
    size: usize,
  ) -> BlockId {
    debug_assert!(self.directory.is_last(id));

    let offset = self.directory[id].offset;
    let start = self.extend(offset, size);

    if start != offset {
      let grown = self.directory.push_back(Block::new(start, size, Status::HeapAllocated));
      log::trace!("tail {:?} cut off by a foreign break move, new block {:?} at offset {}", id, grown, start);

      self.stamp(grown);
      return grown;
    }

    let block = &mut self.directory[id];
    block.size = size;
    block.status = Status::HeapAllocated;
    self.stamp(id);
    id
  }

  /// Grows a live tail block, moving its first `keep` bytes when it cannot
  /// grow where it is.
  fn grow_live_tail(
    &mut self,
    id: BlockId,
    payload: NonNull<u8>,
    keep: usize,
    new_size: usize,
  ) -> NonNull<u8> {
    let grown = self.grow_tail(id, new_size);
    if grown == id {
      return payload;
    }

    let dest = self.region.payload(self.directory[grown].offset);
    unsafe { region::copy_payload(payload, dest, keep) };
    self.free_block(id);

    log::trace!("relocated {:?} -> {:?}", payload, dest);
    dest
  }

  /// Links a free block of `size` bytes right after `id`, merging it with a
  /// free successor.
  fn split_after(
    &mut self,
    id: BlockId,
    size: usize,
  ) -> BlockId {
    let offset = self.directory[id].end();
    let suffix = self.directory.insert_after(id, Block::new(offset, size, Status::Free));

    if self.free_next(suffix).is_some() {
      self.directory.absorb_next(suffix);
    }

    log::trace!("split {:?}: free suffix {:?} of {} bytes", id, suffix, self.directory[suffix].size);

    self.stamp(suffix);
    suffix
  }

  /// Frees a heap block and merges it with free neighbours.
  fn free_block(
    &mut self,
    id: BlockId,
  ) -> BlockId {
    self.directory[id].status = Status::Free;

    let prev = self
      .directory
      .adjacent_prev(id)
      .filter(|prev| self.directory[*prev].status.is_free());
    let id = match prev {
      Some(prev) => {
        self.directory.absorb_next(prev);
        prev
      }
      None => id,
    };

    if self.free_next(id).is_some() {
      self.directory.absorb_next(id);
    }

    log::trace!("release: free block {:?} now {} bytes", id, self.directory[id].size);

    self.stamp(id);
    id
  }

  fn resize_block(
    &mut self,
    id: BlockId,
    payload: NonNull<u8>,
    new_size: usize,
  ) -> Option<NonNull<u8>> {
    let old_size = self.directory[id].size;

    let free_next = self.free_next(id).map(|next| FreeNeighbor {
      size: self.directory[next].size,
      is_tail: self.directory.is_last(next),
    });

    let request = ResizeRequest {
      old_size,
      new_size,
      placement: Placement::Heap {
        is_tail: self.directory.is_last(id),
        free_next,
      },
    };
    let plan = resize::plan(&request);
    log::trace!("resize {:?}: {} -> {} bytes via {:?}", id, old_size, new_size, plan);

    match plan {
      ResizePlan::Unchanged => {}
      // An inner block keeps its physical extent so neighbours still touch.
      ResizePlan::ShrinkInPlace => {
        if self.directory.is_last(id) {
          self.directory[id].size = new_size;
          self.stamp(id);
        }
      }
      ResizePlan::ShrinkWithSplit => {
        self.directory[id].size = new_size;
        self.split_after(id, old_size - new_size - HEADER_SIZE);
        self.stamp(id);
      }
      ResizePlan::GrowInPlace => return Some(self.grow_live_tail(id, payload, old_size, new_size)),
      ResizePlan::GrowViaMerge => {
        self.directory.absorb_next(id);

        let merged = self.directory[id].size;
        if merged < new_size {
          return Some(self.grow_live_tail(id, payload, old_size, new_size));
        }
        if resize::can_split(merged - new_size) {
          self.directory[id].size = new_size;
          self.split_after(id, merged - new_size - HEADER_SIZE);
        }
        self.stamp(id);
      }
      ResizePlan::Relocate => return self.relocate(payload, old_size, new_size),
    }

    Some(payload)
  }

  /// Moves a live allocation into a fresh one of `new_size` bytes.
  fn relocate(
    &mut self,
    payload: NonNull<u8>,
    old_size: usize,
    new_size: usize,
  ) -> Option<NonNull<u8>> {
    let dest = self.allocate(new_size)?;
    unsafe { region::copy_payload(payload, dest, old_size.min(new_size)) };
    self.release(payload.as_ptr());

    log::trace!("relocated {:?} -> {:?}", payload, dest);
    Some(dest)
  }

  fn map(
    &mut self,
    size: usize,
  ) -> NonNull<u8> {
    let payload = region::map_block(&mut self.os, size).unwrap_or_else(|err| fatal("mmap failed", &err));
    self.mapped.insert(payload.as_ptr() as usize, size);

    log::debug!("mapped {} bytes at {:?}", size, payload);
    payload
  }

  fn unmap(
    &mut self,
    payload: NonNull<u8>,
    size: usize,
  ) {
    self.mapped.remove(&(payload.as_ptr() as usize));

    if let Err(err) = unsafe { region::unmap_block(&mut self.os, payload, size) } {
      fatal("munmap failed", &err);
    }

    log::debug!("unmapped {} bytes at {:?}", size, payload);
  }

  /// The successor of `id`, if it is free and touches `id`.
  fn free_next(
    &self,
    id: BlockId,
  ) -> Option<BlockId> {
    self
      .directory
      .adjacent_next(id)
      .filter(|next| self.directory[*next].status.is_free())
  }

  fn stamp(
    &mut self,
    id: BlockId,
  ) {
    let block = &self.directory[id];
    self.region.write_header(block.offset, Header::heap(block.size, id));
  }

  fn locate(
    &self,
    payload: NonNull<u8>,
  ) -> Located {
    if let Some(&size) = self.mapped.get(&(payload.as_ptr() as usize)) {
      return Located::Mapped(size);
    }

    let Some(offset) = self.region.offset_of(payload) else {
      return Located::Unknown;
    };
    let Some(header) = self.region.read_header(offset) else {
      return Located::Unknown;
    };
    if header.kind != HEAP_KIND {
      return Located::Unknown;
    }

    let id = BlockId(header.slot);
    match self.directory.get(id) {
      Some(block) if block.offset == offset => match block.status {
        Status::Free => Located::Free,
        Status::HeapAllocated => Located::Heap(id),
        Status::MappedAllocated => Located::Unknown,
      },
      _ => Located::Unknown,
    }
  }

  /// Directory blocks in address order.
  pub fn blocks(&self) -> Vec<BlockInfo> {
    self
      .directory
      .iter()
      .map(|(_, block)| BlockInfo {
        payload: self.region.payload(block.offset),
        size: block.size,
        status: block.status,
      })
      .collect()
  }

  /// Status of the block starting at `ptr`, if there is one.
  pub fn status_of(
    &self,
    ptr: *const u8,
  ) -> Option<Status> {
    match self.locate(NonNull::new(ptr.cast_mut())?) {
      Located::Mapped(_) => Some(Status::MappedAllocated),
      Located::Heap(_) => Some(Status::HeapAllocated),
      Located::Free => Some(Status::Free),
      Located::Unknown => None,
    }
  }

  /// Usable bytes behind a live payload pointer.
  pub fn usable_size(
    &self,
    ptr: *const u8,
  ) -> Option<usize> {
    match self.locate(NonNull::new(ptr.cast_mut())?) {
      Located::Mapped(size) => Some(size),
      Located::Heap(id) => Some(self.directory[id].size),
      Located::Free | Located::Unknown => None,
    }
  }

  /// Number of live independently mapped blocks.
  pub fn mapped_count(&self) -> usize {
    self.mapped.len()
  }

  /// Bytes of heap region obtained from the OS.
  pub fn heap_committed(&self) -> usize {
    self.region.committed()
  }

  pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
    self.directory.check_invariants()?;

    if let Some(last) = self.directory.last() {
      let end = self.directory[last].end();
      if end > self.region.committed() {
        return Err(InvariantViolation::PastCommitted {
          end,
          committed: self.region.committed(),
        });
      }
    }

    Ok(())
  }

  fn debug_check(&self) {
    debug_assert_eq!(self.check_invariants(), Ok(()));
  }
}

impl<O: Os + Default> Default for Heap<O> {
  fn default() -> Self {
    Self::new(O::default())
  }
}
