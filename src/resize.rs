//! Resize decisions.
//!
//! ```text
//!                      │ mapped   │ tail          │ free successor         │ otherwise
//!   ───────────────────┼──────────┼───────────────┼────────────────────────┼─────────────────
//!   new == old         │ unchanged│ unchanged     │ unchanged              │ unchanged
//!   new <  old, small  │ relocate │ shrink        │ shrink                 │ shrink
//!   new <  old, splits │ relocate │ shrink + split│ shrink + split         │ shrink + split
//!   new >  old         │ relocate │ grow in place │ merge (fits or tail)   │ relocate
//! ```
//!
//! "small" means the leftover cannot host a header plus one aligned byte.
//! A successor that is free but too small, and not the tail, falls through
//! to relocation.

use std::cmp::Ordering;

use crate::{align::ALIGNMENT, block::HEADER_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizePlan {
  Unchanged,
  ShrinkInPlace,
  ShrinkWithSplit,
  GrowInPlace,
  GrowViaMerge,
  Relocate,
}

/// The free block right after the one being resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeNeighbor {
  pub size: usize,
  pub is_tail: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
  Mapped,
  Heap {
    is_tail: bool,
    free_next: Option<FreeNeighbor>,
  },
}

/// Everything [`plan`] looks at. Sizes are already aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeRequest {
  pub old_size: usize,
  pub new_size: usize,
  pub placement: Placement,
}

/// Whether `leftover` bytes can become a block of their own.
pub(crate) fn can_split(leftover: usize) -> bool {
  leftover >= HEADER_SIZE + ALIGNMENT
}

pub fn plan(request: &ResizeRequest) -> ResizePlan {
  let ResizeRequest {
    old_size,
    new_size,
    placement,
  } = *request;

  match (new_size.cmp(&old_size), placement) {
    (Ordering::Equal, _) => ResizePlan::Unchanged,
    (_, Placement::Mapped) => ResizePlan::Relocate,
    (Ordering::Less, Placement::Heap { .. }) if can_split(old_size - new_size) => ResizePlan::ShrinkWithSplit,
    (Ordering::Less, Placement::Heap { .. }) => ResizePlan::ShrinkInPlace,
    (Ordering::Greater, Placement::Heap { is_tail: true, .. }) => ResizePlan::GrowInPlace,
    (Ordering::Greater, Placement::Heap { free_next: Some(next), .. })
      if next.is_tail || old_size + HEADER_SIZE + next.size >= new_size =>
    {
      ResizePlan::GrowViaMerge
    }
    (Ordering::Greater, Placement::Heap { .. }) => ResizePlan::Relocate,
  }
}
