//! Explicit free list.
//!
//! A doubly linked chain threaded through the payloads of free blocks. The
//! list only links and unlinks; block tags are the arena's business.
//!
//! Links are written on every insert and cleared on every removal, so a block
//! outside the list never carries stale `next`/`prev` values.

use crate::layout::Block;

pub struct FreeList {
  head: Option<Block>,
  tail: Option<Block>,
  len: usize,
}

// Blocks are owned by the arena that owns the list.
unsafe impl Send for FreeList {}

impl FreeList {
  pub const fn new() -> Self {
    Self {
      head: None,
      tail: None,
      len: 0,
    }
  }

  #[inline]
  pub fn head(&self) -> Option<Block> {
    self.head
  }

  #[inline]
  pub fn tail(&self) -> Option<Block> {
    self.tail
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.len
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.head.is_none()
  }

  /// O(1) LIFO insertion.
  ///
  /// # Safety
  /// `block` must be a free block that is not already linked. Its link words
  /// may hold anything; both are overwritten.
  pub unsafe fn insert_head(&mut self, block: Block) {
    unsafe {
      debug_assert_unlinked(self, block);
      block.set_prev_free(None);
      block.set_next_free(self.head);
      match self.head {
        Some(head) => head.set_prev_free(Some(block)),
        None => self.tail = Some(block),
      }
    }
    self.head = Some(block);
    self.len += 1;
  }

  /// O(n) insertion keeping the list sorted by address.
  ///
  /// # Safety
  /// Same as [`FreeList::insert_head`].
  pub unsafe fn insert_ordered(&mut self, block: Block) {
    unsafe {
      debug_assert_unlinked(self, block);
      match self.tail {
        Some(tail) if tail < block => {
          block.set_prev_free(Some(tail));
          block.set_next_free(None);
          tail.set_next_free(Some(block));
          self.tail = Some(block);
          self.len += 1;
          return;
        }
        _ => {}
      }

      let mut prev = None;
      let mut cursor = self.head;
      while let Some(node) = cursor {
        if node > block {
          break;
        }
        prev = Some(node);
        cursor = node.next_free();
      }
      self.splice(prev, block, cursor);
    }
  }

  /// O(1) unlink. The block's links are cleared.
  ///
  /// # Safety
  /// `block` must be linked in this list.
  pub unsafe fn remove(&mut self, block: Block) {
    unsafe {
      let prev = block.prev_free();
      let next = block.next_free();
      match prev {
        Some(p) => p.set_next_free(next),
        None => {
          debug_assert_eq!(self.head, Some(block), "unlinking a block not in this list");
          self.head = next;
        }
      }
      match next {
        Some(n) => n.set_prev_free(prev),
        None => self.tail = prev,
      }
      block.set_next_free(None);
      block.set_prev_free(None);
    }
    self.len -= 1;
  }

  /// Puts `new` in `old`'s position and clears `old`'s links.
  ///
  /// # Safety
  /// `old` must be linked in this list; `new` must be free and unlinked.
  pub unsafe fn replace(&mut self, old: Block, new: Block) {
    unsafe {
      let prev = old.prev_free();
      let next = old.next_free();
      new.set_prev_free(prev);
      new.set_next_free(next);
      match prev {
        Some(p) => p.set_next_free(Some(new)),
        None => self.head = Some(new),
      }
      match next {
        Some(n) => n.set_prev_free(Some(new)),
        None => self.tail = Some(new),
      }
      old.set_next_free(None);
      old.set_prev_free(None);
    }
  }

  unsafe fn splice(&mut self, prev: Option<Block>, block: Block, next: Option<Block>) {
    unsafe {
      block.set_prev_free(prev);
      block.set_next_free(next);
      match prev {
        Some(p) => p.set_next_free(Some(block)),
        None => self.head = Some(block),
      }
      match next {
        Some(n) => n.set_prev_free(Some(block)),
        None => self.tail = Some(block),
      }
    }
    self.len += 1;
  }

  /// Walks the list from head to tail.
  ///
  /// # Safety
  /// The list must not be mutated while the iterator is alive.
  pub unsafe fn iter(&self) -> Iter<'_> {
    Iter {
      cursor: self.head,
      _list: self,
    }
  }
}

impl Default for FreeList {
  fn default() -> Self {
    Self::new()
  }
}

pub struct Iter<'a> {
  cursor: Option<Block>,
  _list: &'a FreeList,
}

impl Iterator for Iter<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    let block = self.cursor?;
    self.cursor = unsafe { block.next_free() };
    Some(block)
  }
}

#[inline]
unsafe fn debug_assert_unlinked(list: &FreeList, block: Block) {
  if cfg!(debug_assertions) {
    unsafe {
      debug_assert!(!block.allocated(), "linking allocated block {:#x}", block.addr());
      debug_assert!(list.head != Some(block), "block {:#x} is already linked", block.addr());
    }
  }
}
