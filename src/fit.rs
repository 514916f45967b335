//! Placement strategies.

use crate::{
  layout::{Block, GRANULE},
  list::FreeList,
};

/// How a free block is chosen for a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Fit {
  /// The first block in list order that is large enough.
  #[default]
  First,
  /// The block leaving the smallest leftover. The scan stops early at an
  /// exact match, since sizes are whole granules and nothing can beat it.
  Best,
}

impl Fit {
  /// Picks a block with at least `size` payload bytes, or `None` to grow the heap.
  ///
  /// # Safety
  /// Every block linked in `list` must be a valid free block.
  pub unsafe fn select(self, list: &FreeList, size: usize) -> Option<Block> {
    unsafe {
      match self {
        Fit::First => first_fit(list, size),
        Fit::Best => best_fit(list, size),
      }
    }
  }
}

unsafe fn first_fit(list: &FreeList, size: usize) -> Option<Block> {
  unsafe { list.iter().find(|block| block.size() >= size) }
}

unsafe fn best_fit(list: &FreeList, size: usize) -> Option<Block> {
  let mut best: Option<(Block, usize)> = None;
  for block in unsafe { list.iter() } {
    let available = unsafe { block.size() };
    if available < size {
      continue;
    }
    let leftover = available - size;
    // Strict comparison: the first block reaching a leftover keeps it.
    if best.is_none_or(|(_, current)| leftover < current) {
      best = Some((block, leftover));
      if leftover < GRANULE {
        break;
      }
    }
  }
  best.map(|(block, _)| block)
}
