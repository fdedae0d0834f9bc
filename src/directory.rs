//! The address-ordered list of heap blocks.
//!
//! ```text
//!   slots:   [ A ] [ C ] [ -- ] [ B ]        (arena, vacant slots recycled)
//!
//!   order:   first                last
//!              │                    │
//!              ▼                    ▼
//!            ┌───┐  next  ┌───┐  next  ┌───┐
//!            │ A │ ─────► │ B │ ─────► │ C │
//!            │   │ ◄───── │   │ ◄───── │   │
//!            └───┘  prev  └───┘  prev  └───┘
//!          offset 0    A.end()      B.end()
//! ```
//!
//! Links are arena indices, never addresses; block offsets are the only tie
//! to the physical region. Neighbours usually touch, but a block appended
//! after another `sbrk` user moved the break starts past a gap. Only
//! touching blocks ever merge.

use std::ops::{Index, IndexMut};

use thiserror::Error;

use crate::{
  align::ALIGNMENT,
  block::{Block, BlockId, HEADER_SIZE, Status},
};

/// A broken directory invariant, reported by [`BlockDirectory::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
  #[error("block {0:?} starts before its predecessor ends")]
  Overlapping(BlockId),
  #[error("links around block {0:?} are not mutual inverses")]
  BrokenLink(BlockId),
  #[error("blocks {0:?} and {1:?} are adjacent and both free")]
  AdjacentFree(BlockId, BlockId),
  #[error("block {0:?} has an offset or size that is not a multiple of the alignment")]
  Misaligned(BlockId),
  #[error("block {0:?} is marked as mapped")]
  MappedInDirectory(BlockId),
  #[error("tail cache does not point at the highest block")]
  StaleTail,
  #[error("tail ends at {end}, past the {committed} committed bytes")]
  PastCommitted { end: usize, committed: usize },
  #[error("{linked} blocks linked but {live} slots live")]
  Unreachable { linked: usize, live: usize },
}

#[derive(Debug, Default)]
pub struct BlockDirectory {
  slots: Vec<Option<Block>>,
  vacant: Vec<BlockId>,
  first: Option<BlockId>,
  last: Option<BlockId>,
}

impl BlockDirectory {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.first.is_none()
  }

  pub fn first(&self) -> Option<BlockId> {
    self.first
  }

  pub fn last(&self) -> Option<BlockId> {
    self.last
  }

  /// Number of linked blocks.
  pub fn len(&self) -> usize {
    self.slots.len() - self.vacant.len()
  }

  pub fn get(
    &self,
    id: BlockId,
  ) -> Option<&Block> {
    self.slots.get(id.index()).and_then(Option::as_ref)
  }

  pub fn is_last(
    &self,
    id: BlockId,
  ) -> bool {
    self.last == Some(id)
  }

  fn occupy(
    &mut self,
    block: Block,
  ) -> BlockId {
    if let Some(id) = self.vacant.pop() {
      self.slots[id.index()] = Some(block);
      return id;
    }

    let Ok(index) = u32::try_from(self.slots.len()) else {
      panic!("block directory exhausted its slot space");
    };
    assert!(index != u32::MAX, "block directory exhausted its slot space");

    self.slots.push(Some(block));
    BlockId(index)
  }

  fn vacate(
    &mut self,
    id: BlockId,
  ) -> Block {
    let Some(block) = self.slots[id.index()].take() else {
      panic!("vacating empty slot {id:?}");
    };
    self.vacant.push(id);
    block
  }

  /// Links `block` as the new highest-address entry.
  pub fn push_back(
    &mut self,
    mut block: Block,
  ) -> BlockId {
    block.prev = self.last;
    block.next = None;

    let id = self.occupy(block);

    match self.last {
      Some(last) => self[last].next = Some(id),
      None => self.first = Some(id),
    }
    self.last = Some(id);

    id
  }

  /// Links `block` immediately after `id`.
  pub fn insert_after(
    &mut self,
    id: BlockId,
    mut block: Block,
  ) -> BlockId {
    let next = self[id].next;
    block.prev = Some(id);
    block.next = next;

    let new_id = self.occupy(block);

    self[id].next = Some(new_id);
    match next {
      Some(next) => self[next].prev = Some(new_id),
      None => self.last = Some(new_id),
    }

    new_id
  }

  /// The successor of `id`, if it starts exactly where `id` ends.
  pub fn adjacent_next(
    &self,
    id: BlockId,
  ) -> Option<BlockId> {
    let block = &self[id];
    block.next.filter(|next| self[*next].offset == block.end())
  }

  /// The predecessor of `id`, if it ends exactly where `id` starts.
  pub fn adjacent_prev(
    &self,
    id: BlockId,
  ) -> Option<BlockId> {
    let block = &self[id];
    block.prev.filter(|prev| self[*prev].end() == block.offset)
  }

  /// Merges the successor of `id` into it: payload grows by the successor's
  /// header and payload. Returns the absorbed slot.
  ///
  /// The successor must touch `id`.
  pub fn absorb_next(
    &mut self,
    id: BlockId,
  ) -> Option<BlockId> {
    let next_id = self[id].next?;
    debug_assert_eq!(self[next_id].offset, self[id].end(), "absorbing across a gap");
    let absorbed = self.vacate(next_id);

    let block = &mut self[id];
    block.size += HEADER_SIZE + absorbed.size;
    block.next = absorbed.next;

    match absorbed.next {
      Some(after) => self[after].prev = Some(id),
      None => self.last = Some(id),
    }

    Some(next_id)
  }

  /// Smallest free block holding at least `size` bytes; the lowest address
  /// wins a tie.
  pub fn best_fit(
    &self,
    size: usize,
  ) -> Option<BlockId> {
    let mut best: Option<(BlockId, usize)> = None;

    for (id, block) in self.iter() {
      if !block.status.is_free() || block.size < size {
        continue;
      }
      if best.is_none_or(|(_, best_size)| block.size < best_size) {
        best = Some((id, block.size));
        if block.size == size {
          break;
        }
      }
    }

    best.map(|(id, _)| id)
  }

  /// Blocks in increasing address order.
  pub fn iter(&self) -> Iter<'_> {
    Iter {
      directory: self,
      current: self.first,
    }
  }

  pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
    let mut linked = 0;
    let mut previous: Option<(BlockId, &Block)> = None;

    for (id, block) in self.iter() {
      linked += 1;
      if linked > self.len() {
        return Err(InvariantViolation::BrokenLink(id));
      }

      if block.offset % ALIGNMENT != 0 || block.size % ALIGNMENT != 0 {
        return Err(InvariantViolation::Misaligned(id));
      }
      if block.status == Status::MappedAllocated {
        return Err(InvariantViolation::MappedInDirectory(id));
      }
      if block.prev != previous.map(|(prev_id, _)| prev_id) {
        return Err(InvariantViolation::BrokenLink(id));
      }

      if let Some((prev_id, prev)) = previous {
        if block.offset < prev.end() {
          return Err(InvariantViolation::Overlapping(id));
        }
        if prev.end() == block.offset && prev.status.is_free() && block.status.is_free() {
          return Err(InvariantViolation::AdjacentFree(prev_id, id));
        }
      }

      previous = Some((id, block));
    }

    if self.last != previous.map(|(id, _)| id) {
      return Err(InvariantViolation::StaleTail);
    }
    if linked != self.len() {
      return Err(InvariantViolation::Unreachable {
        linked,
        live: self.len(),
      });
    }

    Ok(())
  }
}

impl Index<BlockId> for BlockDirectory {
  type Output = Block;

  fn index(
    &self,
    id: BlockId,
  ) -> &Block {
    match self.get(id) {
      Some(block) => block,
      None => panic!("no block in slot {id:?}"),
    }
  }
}

impl IndexMut<BlockId> for BlockDirectory {
  fn index_mut(
    &mut self,
    id: BlockId,
  ) -> &mut Block {
    match self.slots.get_mut(id.index()).and_then(Option::as_mut) {
      Some(block) => block,
      None => panic!("no block in slot {id:?}"),
    }
  }
}

pub struct Iter<'a> {
  directory: &'a BlockDirectory,
  current: Option<BlockId>,
}

impl<'a> Iterator for Iter<'a> {
  type Item = (BlockId, &'a Block);

  fn next(&mut self) -> Option<Self::Item> {
    let id = self.current?;
    let block = self.directory.get(id)?;
    self.current = block.next;
    Some((id, block))
  }
}
