//! The arena: one free list plus the policy that drives it.
//!
//! Allocation scans the list with a [`Fit`], carves the chosen block (split or
//! hand out whole) or grows the heap by exactly one block. Free validates the
//! pointer, relinks the block and merges it with free physical neighbours.
//!
//! One type serves every deployment shape; [`Policy`] picks the insertion
//! order, how neighbours are found, and the split threshold.

use core::{
  ptr::NonNull,
  sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
  check::{self, CheckError, Report},
  error::{AllocError, FreeError},
  fit::Fit,
  heap::{Heap, HeapSource},
  layout::{Block, GRANULE, MIN_PAYLOAD, OVERHEAD, SENTINEL_OWNER, TAG_SIZE, align_up, round_request},
  list::FreeList,
};

/// Where a freed block enters the free list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Insertion {
  /// At the head.
  Lifo,
  /// Sorted by address.
  AddressOrdered,
}

/// How a freed block finds neighbours to merge with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coalesce {
  /// Read the successor's header and the predecessor's footer in place.
  /// Neighbours are merged only if they carry the same owner.
  BoundaryTags,
  /// Look only at the block's list neighbours and merge those that touch it.
  /// Never reads memory outside blocks this arena owns. Requires
  /// [`Insertion::AddressOrdered`].
  ListNeighbors,
}

/// Arena configuration. Immutable once the arena is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Policy {
  insertion: Insertion,
  coalesce: Coalesce,
  min_remainder: usize,
}

impl Policy {
  /// A single shared arena: LIFO list, boundary-tag coalescing.
  pub const SHARED: Policy = Policy::new(Insertion::Lifo, Coalesce::BoundaryTags);

  /// A thread-private arena inside a heap shared with other threads.
  pub const PER_THREAD: Policy = Policy::new(Insertion::AddressOrdered, Coalesce::ListNeighbors);

  /// # Panics
  /// If `coalesce` is [`Coalesce::ListNeighbors`] and `insertion` is not address-ordered.
  pub const fn new(insertion: Insertion, coalesce: Coalesce) -> Self {
    assert!(
      !matches!(
        (insertion, coalesce),
        (Insertion::Lifo, Coalesce::ListNeighbors)
      ),
      "list-neighbour coalescing needs an address-ordered list"
    );
    Self {
      insertion,
      coalesce,
      min_remainder: MIN_PAYLOAD,
    }
  }

  /// Sets the smallest payload a split may leave behind.
  ///
  /// Rounded up to the granularity and never below the minimum payload.
  pub const fn with_min_remainder(mut self, bytes: usize) -> Self {
    let bytes = align_up(bytes, GRANULE);
    self.min_remainder = if bytes < MIN_PAYLOAD { MIN_PAYLOAD } else { bytes };
    self
  }

  pub const fn insertion(&self) -> Insertion {
    self.insertion
  }

  pub const fn coalesce(&self) -> Coalesce {
    self.coalesce
  }

  pub const fn min_remainder(&self) -> usize {
    self.min_remainder
  }

  /// Leftover bytes from which a chosen block is split rather than handed out whole.
  pub const fn split_threshold(&self) -> usize {
    OVERHEAD + self.min_remainder
  }
}

impl Default for Policy {
  fn default() -> Self {
    Self::SHARED
  }
}

/// Arena ids for the whole process. Heaps on the program break interleave, so
/// ids must stay distinct across every heap, not just within one.
static NEXT_ID: AtomicUsize = AtomicUsize::new(SENTINEL_OWNER + 1);

/// An arena id no other call has returned.
pub fn fresh_id() -> usize {
  NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A free list and the identity stamped into every block it creates.
pub struct Arena {
  list: FreeList,
  policy: Policy,
  id: usize,
}

impl Arena {
  /// An arena with a fixed id. Arenas whose heaps can overlap must not share
  /// one; [`fresh_id`] hands out safe values.
  ///
  /// # Panics
  /// If `id` is the sentinel owner (0).
  pub const fn new(id: usize, policy: Policy) -> Self {
    assert!(id != SENTINEL_OWNER, "arena id 0 is reserved for sentinels");
    Self {
      list: FreeList::new(),
      policy,
      id,
    }
  }

  /// An arena that takes a [`fresh_id`] on its first allocation.
  pub const fn unnamed(policy: Policy) -> Self {
    Self {
      list: FreeList::new(),
      policy,
      id: SENTINEL_OWNER,
    }
  }

  /// The owner stamped into this arena's blocks; 0 while an unnamed arena
  /// has not allocated yet.
  #[inline]
  pub fn id(&self) -> usize {
    self.id
  }

  #[inline]
  pub fn policy(&self) -> Policy {
    self.policy
  }

  /// Number of blocks currently in the free list.
  pub fn free_blocks(&self) -> usize {
    self.list.len()
  }

  pub(crate) fn list(&self) -> &FreeList {
    &self.list
  }

  /// Validates this arena's blocks and free list; see [`check::arena`].
  ///
  /// # Safety
  /// No allocation or release may run on `heap` while this runs.
  pub unsafe fn check<S: HeapSource>(&self, heap: &Heap<S>) -> Result<Report, CheckError> {
    unsafe { check::arena(self, heap) }
  }

  /// Returns a pointer to at least `size` bytes, aligned to [`GRANULE`].
  ///
  /// `heap` must be the heap every previous call on this arena used.
  pub fn allocate<S: HeapSource>(
    &mut self,
    heap: &Heap<S>,
    size: usize,
    fit: Fit,
  ) -> Result<NonNull<u8>, AllocError> {
    let size = round_request(size)?;
    if self.id == SENTINEL_OWNER {
      self.id = fresh_id();
    }
    let chosen = unsafe { fit.select(&self.list, size) };
    let block = match chosen {
      Some(block) => unsafe { self.reuse(heap, block, size) },
      None => heap.grow(size, self.id)?,
    };
    Ok(block.payload())
  }

  /// Carves `size` bytes out of a listed free block.
  unsafe fn reuse<S: HeapSource>(&mut self, heap: &Heap<S>, block: Block, size: usize) -> Block {
    unsafe {
      let available = block.size();
      let leftover = available - size;
      if leftover >= self.policy.split_threshold() {
        // Low part is handed out, high part takes the block's list position.
        let remainder = Block::at(block.addr() + OVERHEAD + size);
        self.list.replace(block, remainder);
        block.init(size, true, self.id);
        remainder.init(leftover - OVERHEAD, false, self.id);
        heap.stats().sub_free(size + OVERHEAD);
      } else {
        self.list.remove(block);
        block.set_allocated(true);
        heap.stats().sub_free(available + OVERHEAD);
      }
      block
    }
  }

  /// Releases a pointer returned by [`Arena::allocate`].
  ///
  /// The pointer is validated before anything is touched; on `Err` the heap is
  /// unchanged.
  ///
  /// # Safety
  /// `ptr` must point into memory of `heap` that is readable, and must not be
  /// used after a successful return. Validation catches double frees and
  /// foreign pointers on a best-effort basis only.
  pub unsafe fn free<S: HeapSource>(
    &mut self,
    heap: &Heap<S>,
    ptr: NonNull<u8>,
  ) -> Result<(), FreeError> {
    let block = unsafe { self.validate(heap, ptr)? };
    unsafe {
      let span = block.span();
      block.set_allocated(false);
      heap.stats().add_free(span);

      match self.policy.insertion {
        Insertion::Lifo => self.list.insert_head(block),
        Insertion::AddressOrdered => self.list.insert_ordered(block),
      }
      match self.policy.coalesce {
        Coalesce::BoundaryTags => self.coalesce_tags(heap, block),
        Coalesce::ListNeighbors => self.coalesce_neighbors(heap, block),
      }
    }
    Ok(())
  }

  unsafe fn validate<S: HeapSource>(&self, heap: &Heap<S>, ptr: NonNull<u8>) -> Result<Block, FreeError> {
    let addr = ptr.as_ptr() as usize;
    if addr % GRANULE != 0 {
      return Err(FreeError::Misaligned { addr });
    }
    let Some(header_addr) = addr.checked_sub(TAG_SIZE) else {
      return Err(FreeError::OutOfBounds { addr });
    };
    if !heap.contains(header_addr, OVERHEAD + MIN_PAYLOAD) {
      return Err(FreeError::OutOfBounds { addr });
    }

    let block = unsafe { Block::header_of(ptr) };
    let header = unsafe { block.header() };
    if !header.allocated() || header.owner == SENTINEL_OWNER {
      return Err(FreeError::NotAllocated { addr });
    }
    if header.owner != self.id {
      return Err(FreeError::ForeignArena {
        addr,
        owner: header.owner,
        arena: self.id,
      });
    }
    if header.size() % GRANULE != 0 || !heap.contains(block.addr(), header.size() + OVERHEAD) {
      return Err(FreeError::Corrupt { addr });
    }
    if unsafe { block.footer() } != header {
      return Err(FreeError::Corrupt { addr });
    }
    Ok(block)
  }

  /// Merges a just-freed, listed block with free physical neighbours found
  /// through their boundary tags. Right first, then left.
  unsafe fn coalesce_tags<S: HeapSource>(&mut self, heap: &Heap<S>, block: Block) {
    let (lo, hi) = heap.bounds();
    unsafe {
      let next = block.next_physical();
      if next.addr() + TAG_SIZE <= hi {
        let tag = next.header();
        if !tag.allocated() && tag.owner == self.id {
          self.list.remove(next);
          block.init(block.size() + tag.size() + OVERHEAD, false, self.id);
        }
      }

      if block.addr() - TAG_SIZE >= lo {
        let footer = block.prev_footer();
        if !footer.allocated() && footer.owner == self.id {
          let prev = block.prev_physical(footer);
          if prev.addr() >= lo {
            let span = block.span();
            self.list.remove(block);
            prev.init(prev.size() + span, false, self.id);
          }
        }
      }
    }
  }

  /// Merges a just-freed block with its address-ordered list neighbours when
  /// they touch it.
  unsafe fn coalesce_neighbors<S: HeapSource>(&mut self, heap: &Heap<S>, block: Block) {
    unsafe {
      if let Some(next) = block.next_free()
        && block.end() == next.addr()
      {
        debug_assert!(heap.contains(next.addr(), next.span()));
        self.list.remove(next);
        block.init(block.size() + next.span(), false, self.id);
      }

      if let Some(prev) = block.prev_free()
        && prev.end() == block.addr()
      {
        debug_assert!(heap.contains(prev.addr(), prev.span()));
        let span = block.span();
        self.list.remove(block);
        prev.init(prev.size() + span, false, self.id);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::heap::Reserved;

  fn heap() -> Heap<Reserved> {
    Heap::new(Reserved::new(1 << 20).unwrap())
  }

  fn arenas() -> [Arena; 2] {
    [Arena::new(1, Policy::SHARED), Arena::new(2, Policy::PER_THREAD)]
  }

  fn block_of(ptr: NonNull<u8>) -> Block {
    unsafe { Block::header_of(ptr) }
  }

  fn free_sizes(arena: &Arena) -> Vec<usize> {
    unsafe { arena.list().iter().map(|b| b.size()).collect() }
  }

  #[test]
  fn zero_size_is_a_defined_failure() {
    let heap = heap();
    let mut arena = Arena::new(1, Policy::SHARED);
    assert_eq!(arena.allocate(&heap, 0, Fit::First), Err(AllocError::ZeroSize));
    assert_eq!(heap.stats().reserved(), 0);
  }

  #[test]
  fn reuse_splits_freed_block() {
    for fit in [Fit::First, Fit::Best] {
      for mut arena in arenas() {
        let heap = heap();
        let a = arena.allocate(&heap, 100, fit).unwrap();
        let _b = arena.allocate(&heap, 50, fit).unwrap();
        unsafe { arena.free(&heap, a).unwrap() };

        let c = arena.allocate(&heap, 40, fit).unwrap();
        assert_eq!(c, a, "{fit:?} should reuse the freed block");

        let used = round_request(40).unwrap();
        let leftover = round_request(100).unwrap() - used - OVERHEAD;
        assert!(leftover >= MIN_PAYLOAD);
        assert_eq!(free_sizes(&arena), vec![leftover]);
        unsafe {
          assert_eq!(block_of(c).size(), used);
          let remainder = block_of(c).next_physical();
          assert!(!remainder.allocated());
          assert_eq!(remainder.header(), remainder.footer());
        }
      }
    }
  }

  #[test]
  fn small_leftover_is_handed_out_whole() {
    let heap = heap();
    let mut arena = Arena::new(1, Policy::SHARED);
    let a = arena.allocate(&heap, 64, Fit::First).unwrap();
    let _guard = arena.allocate(&heap, 16, Fit::First).unwrap();
    unsafe { arena.free(&heap, a).unwrap() };

    // Leftover 16 < split threshold: the whole 64-byte block comes back.
    let b = arena.allocate(&heap, 48, Fit::First).unwrap();
    assert_eq!(b, a);
    assert_eq!(unsafe { block_of(b).size() }, 64);
    assert_eq!(arena.free_blocks(), 0);
    assert_eq!(heap.stats().free(), 0);
  }

  #[test]
  fn best_fit_reuses_exact_block_behind_larger_one() {
    let heap = heap();
    let mut arena = Arena::new(1, Policy::SHARED);
    let exact = arena.allocate(&heap, 32, Fit::Best).unwrap();
    let _guard = arena.allocate(&heap, 16, Fit::Best).unwrap();
    let big = arena.allocate(&heap, 64, Fit::Best).unwrap();
    let _guard = arena.allocate(&heap, 16, Fit::Best).unwrap();
    unsafe {
      arena.free(&heap, exact).unwrap();
      arena.free(&heap, big).unwrap();
    }
    assert_eq!(arena.list().head(), Some(block_of(big)));

    // Leftover 32 on the head block is below the split threshold, yet the
    // exact block further down still wins.
    assert_eq!(arena.allocate(&heap, 32, Fit::Best), Ok(exact));
    assert_eq!(free_sizes(&arena), vec![64]);
  }

  #[test]
  fn min_remainder_raises_split_threshold() {
    let heap = heap();
    let policy = Policy::SHARED.with_min_remainder(100);
    assert_eq!(policy.min_remainder(), 112);
    let mut arena = Arena::new(1, policy);
    let a = arena.allocate(&heap, 256, Fit::First).unwrap();
    let _guard = arena.allocate(&heap, 16, Fit::First).unwrap();
    unsafe { arena.free(&heap, a).unwrap() };

    // 256 - 128 - OVERHEAD = 96 < 112: no split.
    let b = arena.allocate(&heap, 128, Fit::First).unwrap();
    assert_eq!(unsafe { block_of(b).size() }, 256);
  }

  #[test]
  #[should_panic(expected = "address-ordered")]
  fn list_neighbours_need_ordered_list() {
    let _ = Policy::new(Insertion::Lifo, Coalesce::ListNeighbors);
  }

  #[test]
  fn adjacent_frees_merge_in_either_order() {
    for reverse in [false, true] {
      for mut arena in arenas() {
        let heap = heap();
        let a = arena.allocate(&heap, 64, Fit::First).unwrap();
        let b = arena.allocate(&heap, 96, Fit::First).unwrap();
        let _guard = arena.allocate(&heap, 16, Fit::First).unwrap();

        let order = if reverse { [b, a] } else { [a, b] };
        for ptr in order {
          unsafe { arena.free(&heap, ptr).unwrap() };
        }

        assert_eq!(free_sizes(&arena), vec![64 + 96 + OVERHEAD]);
        assert_eq!(arena.list().head(), Some(block_of(a)));
        assert_eq!(heap.stats().free(), 64 + 96 + 2 * OVERHEAD);
      }
    }
  }

  #[test]
  fn three_blocks_merge_in_any_order() {
    const ORDERS: [[usize; 3]; 6] = [
      [0, 1, 2],
      [0, 2, 1],
      [1, 0, 2],
      [1, 2, 0],
      [2, 0, 1],
      [2, 1, 0],
    ];
    for order in ORDERS {
      for mut arena in arenas() {
        let heap = heap();
        let ptrs = [32, 48, 80].map(|size| arena.allocate(&heap, size, Fit::Best).unwrap());
        let _guard = arena.allocate(&heap, 16, Fit::Best).unwrap();
        for i in order {
          unsafe { arena.free(&heap, ptrs[i]).unwrap() };
        }
        assert_eq!(
          free_sizes(&arena),
          vec![32 + 48 + 80 + 2 * OVERHEAD],
          "order {order:?}, policy {:?}",
          arena.policy()
        );
      }
    }
  }

  #[test]
  fn free_restores_free_bytes() {
    let heap = heap();
    let mut arena = Arena::new(1, Policy::SHARED);
    let a = arena.allocate(&heap, 512, Fit::First).unwrap();
    let _guard = arena.allocate(&heap, 16, Fit::First).unwrap();
    unsafe { arena.free(&heap, a).unwrap() };

    let before = heap.stats().snapshot();
    let b = arena.allocate(&heap, 100, Fit::Best).unwrap();
    assert!(heap.stats().free() < before.free);
    unsafe { arena.free(&heap, b).unwrap() };
    assert_eq!(heap.stats().snapshot(), before);
  }

  #[test]
  fn growth_path_creates_allocated_block() {
    let heap = heap();
    let mut arena = Arena::new(9, Policy::SHARED);
    let a = arena.allocate(&heap, 24, Fit::First).unwrap();
    let block = block_of(a);
    unsafe {
      assert!(block.allocated());
      assert_eq!(block.owner(), 9);
      assert_eq!(block.size(), 32);
    }
    assert_eq!(arena.free_blocks(), 0);
    assert_eq!(a.as_ptr() as usize % GRANULE, 0);
  }

  #[test]
  fn exhaustion_leaves_arena_untouched() {
    let heap = Heap::new(Reserved::new(4096).unwrap());
    let mut arena = Arena::new(1, Policy::SHARED);
    let a = arena.allocate(&heap, 256, Fit::First).unwrap();
    unsafe { arena.free(&heap, a).unwrap() };
    let before = heap.stats().snapshot();

    let err = arena.allocate(&heap, 8192, Fit::First).unwrap_err();
    assert_eq!(err, AllocError::Exhausted { requested: 8192 });
    assert_eq!(heap.stats().snapshot(), before);
    assert_eq!(free_sizes(&arena), vec![256]);
  }

  #[test]
  fn invalid_frees_are_rejected_before_mutation() {
    let heap = heap();
    let mut arena = Arena::new(1, Policy::SHARED);
    let mut other = Arena::new(2, Policy::SHARED);
    let a = arena.allocate(&heap, 64, Fit::First).unwrap();
    let b = arena.allocate(&heap, 64, Fit::First).unwrap();
    let before = heap.stats().snapshot();

    unsafe {
      let interior = NonNull::new_unchecked(a.as_ptr().add(8));
      assert!(matches!(arena.free(&heap, interior), Err(FreeError::Misaligned { .. })));

      let mut outside = [0u128; 8];
      let stray = NonNull::new_unchecked(outside.as_mut_ptr().add(2).cast::<u8>());
      assert!(matches!(arena.free(&heap, stray), Err(FreeError::OutOfBounds { .. })));

      assert!(matches!(other.free(&heap, b), Err(FreeError::ForeignArena { owner: 1, arena: 2, .. })));
    }
    assert_eq!(heap.stats().snapshot(), before);

    unsafe {
      arena.free(&heap, b).unwrap();
      assert!(matches!(arena.free(&heap, b), Err(FreeError::NotAllocated { .. })));
    }
  }

  #[test]
  fn corrupt_footer_is_detected() {
    let heap = heap();
    let mut arena = Arena::new(1, Policy::SHARED);
    let a = arena.allocate(&heap, 32, Fit::First).unwrap();
    unsafe {
      // Overrun the payload into the footer.
      a.as_ptr().add(32).write_bytes(0xAB, 8);
      assert!(matches!(arena.free(&heap, a), Err(FreeError::Corrupt { .. })));
    }
  }

  #[test]
  fn boundary_tags_skip_other_owners() {
    let heap = heap();
    let mut mine = Arena::new(1, Policy::SHARED);
    let mut theirs = Arena::new(2, Policy::SHARED);
    let a = mine.allocate(&heap, 32, Fit::First).unwrap();
    let b = theirs.allocate(&heap, 32, Fit::First).unwrap();
    let c = mine.allocate(&heap, 32, Fit::First).unwrap();
    unsafe {
      theirs.free(&heap, b).unwrap();
      mine.free(&heap, a).unwrap();
      mine.free(&heap, c).unwrap();
    }
    assert_eq!(free_sizes(&mine).len(), 2);
    assert_eq!(free_sizes(&theirs), vec![32]);
  }

  #[test]
  fn ordered_list_stays_sorted() {
    let heap = heap();
    let mut arena = Arena::new(1, Policy::PER_THREAD);
    let ptrs: Vec<_> = (0..8)
      .map(|_| arena.allocate(&heap, 32, Fit::Best).unwrap())
      .collect();
    for i in [5, 1, 6, 3] {
      unsafe { arena.free(&heap, ptrs[i]).unwrap() };
    }
    let addrs: Vec<_> = unsafe { arena.list().iter().map(Block::addr).collect() };
    let mut sorted = addrs.clone();
    sorted.sort_unstable();
    assert_eq!(addrs, sorted);
    assert_eq!(addrs.len(), 3, "5 and 6 merge");
  }

  mod proptests {
    use super::*;
    use crate::check;
    use proptest::prelude::*;

    #[derive(Clone, Debug)]
    enum Op {
      Alloc(usize),
      Free(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
      prop_oneof![
        (1usize..600).prop_map(Op::Alloc),
        any::<usize>().prop_map(Op::Free),
      ]
    }

    fn setup(best: bool, ordered: bool) -> (Heap<Reserved>, Arena, Fit) {
      let policy = if ordered { Policy::PER_THREAD } else { Policy::SHARED };
      let fit = if best { Fit::Best } else { Fit::First };
      (heap(), Arena::new(1, policy), fit)
    }

    proptest! {
      #[test]
      fn random_traffic_keeps_heap_consistent(
        ops in proptest::collection::vec(op(), 1..120),
        best in any::<bool>(),
        ordered in any::<bool>(),
      ) {
        let (heap, mut arena, fit) = setup(best, ordered);
        let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();

        for op in ops {
          match op {
            Op::Alloc(size) => {
              let ptr = arena.allocate(&heap, size, fit).unwrap();
              // Fill the whole request; any overlap with metadata shows up in the walk.
              unsafe { ptr.as_ptr().write_bytes(0xEE, size) };
              live.push((ptr, size));
            }
            Op::Free(pick) if !live.is_empty() => {
              let (ptr, _) = live.swap_remove(pick % live.len());
              unsafe { arena.free(&heap, ptr).unwrap() };
            }
            Op::Free(_) => {}
          }
          let report = unsafe { check::walk(&heap) };
          prop_assert!(report.is_ok(), "{:?}", report);
          prop_assert_eq!(unsafe { arena.check(&heap) }, report);
        }

        let mut spans: Vec<(usize, usize)> = live
          .iter()
          .map(|(ptr, size)| (ptr.as_ptr() as usize, *size))
          .collect();
        spans.sort_unstable();
        for pair in spans.windows(2) {
          prop_assert!(pair[0].0 + pair[0].1 <= pair[1].0);
        }

        let snap = heap.stats().snapshot();
        let report = unsafe { check::walk(&heap) }.unwrap();
        prop_assert_eq!(snap.reserved, report.allocated + report.free + snap.fenced);
        prop_assert!(snap.free <= snap.reserved);
      }

      #[test]
      fn allocate_then_free_restores_free_bytes(
        warmup in proptest::collection::vec(1usize..600, 0..24),
        keep in proptest::collection::vec(any::<bool>(), 24),
        size in 1usize..600,
        best in any::<bool>(),
        ordered in any::<bool>(),
      ) {
        let (heap, mut arena, fit) = setup(best, ordered);
        for (i, &n) in warmup.iter().enumerate() {
          let ptr = arena.allocate(&heap, n, fit).unwrap();
          if !keep[i] {
            unsafe { arena.free(&heap, ptr).unwrap() };
          }
        }

        let before = heap.stats().snapshot();
        let ptr = arena.allocate(&heap, size, fit).unwrap();
        unsafe { arena.free(&heap, ptr).unwrap() };
        let after = heap.stats().snapshot();

        // Only fresh growth can add free bytes.
        let grown = (after.reserved - after.fenced) - (before.reserved - before.fenced);
        prop_assert_eq!(after.free, before.free + grown);
      }
    }
  }
}
