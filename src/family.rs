//! The three deployment shapes, built from one [`Arena`].
//!
//! | Shape          | Free lists     | Synchronization               |
//! |----------------|----------------|-------------------------------|
//! | [`Unlocked`]   | one            | none, callers serialize       |
//! | [`Locked`]     | one            | one lock around every call    |
//! | [`PerThread`]  | one per thread | heap growth only              |

use core::{
  alloc::{GlobalAlloc, Layout},
  cell::{Cell, UnsafeCell},
  ptr::{NonNull, null_mut},
  sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
  arena::{Arena, Coalesce, Policy, fresh_id},
  check::{CheckError, Report},
  error::{AllocError, FreeError, fatal},
  fit::Fit,
  heap::{Heap, HeapSource},
  layout::GRANULE,
  lock::SpinMutex,
  stats::Snapshot,
};

// =============================================================================
// Unlocked
// =============================================================================

/// One arena, no synchronization.
pub struct Unlocked<S> {
  heap: Heap<S>,
  arena: UnsafeCell<Arena>,
}

// Every method that reaches the arena is `unsafe` and demands exclusive use.
unsafe impl<S: HeapSource> Sync for Unlocked<S> {}

impl<S: HeapSource> Unlocked<S> {
  pub const fn new(source: S) -> Self {
    Self::with_policy(source, Policy::SHARED)
  }

  pub const fn with_policy(source: S, policy: Policy) -> Self {
    Self {
      heap: Heap::new(source),
      arena: UnsafeCell::new(Arena::unnamed(policy)),
    }
  }

  /// # Safety
  /// No other call on `self` may run at the same time.
  pub unsafe fn allocate(&self, size: usize, fit: Fit) -> Result<NonNull<u8>, AllocError> {
    unsafe { (*self.arena.get()).allocate(&self.heap, size, fit) }
  }

  /// # Safety
  /// Same as [`Unlocked::allocate`], plus the contract of [`Arena::free`].
  pub unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
    unsafe { (*self.arena.get()).free(&self.heap, ptr) }
  }

  /// # Safety
  /// Same as [`Unlocked::allocate`].
  pub unsafe fn check(&self) -> Result<Report, CheckError> {
    unsafe { (*self.arena.get()).check(&self.heap) }
  }

  pub fn heap(&self) -> &Heap<S> {
    &self.heap
  }

  pub fn stats(&self) -> Snapshot {
    self.heap.stats().snapshot()
  }
}

// =============================================================================
// Locked
// =============================================================================

/// One arena behind one lock held for the whole of every call.
///
/// Usable as `#[global_allocator]`; alignments above [`GRANULE`] are refused.
pub struct Locked<S> {
  heap: Heap<S>,
  arena: SpinMutex<Arena>,
  fit: Fit,
}

impl<S: HeapSource> Locked<S> {
  pub const fn new(source: S, fit: Fit) -> Self {
    Self::with_policy(source, fit, Policy::SHARED)
  }

  pub const fn with_policy(source: S, fit: Fit, policy: Policy) -> Self {
    Self {
      heap: Heap::new(source),
      arena: SpinMutex::new(Arena::unnamed(policy)),
      fit,
    }
  }

  pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
    self.arena.lock().allocate(&self.heap, size, self.fit)
  }

  /// # Safety
  /// See [`Arena::free`].
  pub unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
    unsafe { self.arena.lock().free(&self.heap, ptr) }
  }

  /// Runs the consistency checker with the lock held.
  pub fn check(&self) -> Result<Report, CheckError> {
    let arena = self.arena.lock();
    unsafe { arena.check(&self.heap) }
  }

  pub fn fit(&self) -> Fit {
    self.fit
  }

  pub fn heap(&self) -> &Heap<S> {
    &self.heap
  }

  pub fn stats(&self) -> Snapshot {
    self.heap.stats().snapshot()
  }
}

unsafe impl<S: HeapSource> GlobalAlloc for Locked<S> {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    if layout.align() > GRANULE {
      return null_mut();
    }
    match self.allocate(layout.size().max(1)) {
      Ok(ptr) => ptr.as_ptr(),
      Err(err) => {
        log::warn!("{err}");
        null_mut()
      }
    }
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    let Some(ptr) = NonNull::new(ptr) else {
      return;
    };
    if let Err(err) = unsafe { self.free(ptr) } {
      fatal(err);
    }
  }
}

// =============================================================================
// PerThread
// =============================================================================

/// Arena slots per thread, shared by every [`PerThread`] value.
const SLOTS: usize = 16;

/// Source of [`PerThread`] keys; 0 means "not yet assigned".
static NEXT_KEY: AtomicUsize = AtomicUsize::new(1);

struct Registry {
  slots: [Option<(usize, Arena)>; SLOTS],
}

impl Registry {
  const fn new() -> Self {
    Self {
      slots: [const { None }; SLOTS],
    }
  }

  fn find(&mut self, key: usize) -> Option<&mut Arena> {
    self
      .slots
      .iter_mut()
      .flatten()
      .find(|(k, _)| *k == key)
      .map(|(_, arena)| arena)
  }

  fn get_or_insert(&mut self, key: usize, policy: Policy) -> Option<&mut Arena> {
    let index = match self.slots.iter().position(|s| matches!(s, Some((k, _)) if *k == key)) {
      Some(index) => index,
      None => {
        let index = self.slots.iter().position(Option::is_none)?;
        self.slots[index] = Some((key, Arena::new(fresh_id(), policy)));
        index
      }
    };
    self.slots[index].as_mut().map(|(_, arena)| arena)
  }

  fn release(&mut self, key: usize) {
    for slot in &mut self.slots {
      if matches!(slot, Some((k, _)) if *k == key) {
        *slot = None;
      }
    }
  }
}

thread_local! {
  static ARENAS: UnsafeCell<Registry> = const { UnsafeCell::new(Registry::new()) };
  static IN_ALLOC: Cell<bool> = const { Cell::new(false) };
}

/// One arena per calling thread over a shared heap.
///
/// A thread's arena is created on its first allocation and only ever touched
/// by that thread. Blocks are tagged with the arena's id, so a pointer
/// released on the wrong thread is rejected with [`FreeError::ForeignArena`].
/// Free blocks left behind by an exiting thread stay counted as free but are
/// not reused.
///
/// Each thread holds at most 16 arenas across all `PerThread` values. Dropping
/// a `PerThread` frees the slot of the dropping thread only; slots on other
/// live threads stay taken until those threads exit, and a thread with every
/// slot taken gets [`AllocError::NoArena`].
///
/// Not a `GlobalAlloc`: Rust code routinely frees on another thread.
pub struct PerThread<S> {
  heap: Heap<S>,
  fit: Fit,
  policy: Policy,
  key: AtomicUsize,
}

impl<S: HeapSource> PerThread<S> {
  pub const fn new(source: S, fit: Fit) -> Self {
    Self::with_policy(source, fit, Policy::PER_THREAD)
  }

  /// # Panics
  /// If `policy` merges neighbours through boundary tags, which would read
  /// other threads' metadata.
  pub const fn with_policy(source: S, fit: Fit, policy: Policy) -> Self {
    assert!(
      matches!(policy.coalesce(), Coalesce::ListNeighbors),
      "per-thread arenas must coalesce through list neighbours"
    );
    Self {
      heap: Heap::new(source),
      fit,
      policy,
      key: AtomicUsize::new(0),
    }
  }

  pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
    self
      .with_arena(true, |arena| arena.allocate(&self.heap, size, self.fit))
      .unwrap_or(Err(AllocError::NoArena))
  }

  /// Releases into the calling thread's arena.
  ///
  /// # Safety
  /// See [`Arena::free`].
  pub unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
    self
      .with_arena(false, |arena| unsafe { arena.free(&self.heap, ptr) })
      .unwrap_or(Err(FreeError::NoArena {
        addr: ptr.as_ptr() as usize,
      }))
  }

  /// Owner id of the calling thread's arena, if it has one yet.
  pub fn local_arena(&self) -> Option<usize> {
    self.with_arena(false, |arena| arena.id())
  }

  /// Blocks in the calling thread's free list.
  pub fn local_free_blocks(&self) -> usize {
    self.with_arena(false, |arena| arena.free_blocks()).unwrap_or(0)
  }

  /// Checks the calling thread's arena.
  ///
  /// # Safety
  /// No thread may allocate or free on `self` while this runs.
  pub unsafe fn check_local(&self) -> Option<Result<Report, CheckError>> {
    self.with_arena(false, |arena| unsafe { arena.check(&self.heap) })
  }

  pub fn fit(&self) -> Fit {
    self.fit
  }

  pub fn heap(&self) -> &Heap<S> {
    &self.heap
  }

  pub fn stats(&self) -> Snapshot {
    self.heap.stats().snapshot()
  }

  fn key(&self) -> usize {
    match self.key.load(Ordering::Acquire) {
      0 => {
        let fresh = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
        match self
          .key
          .compare_exchange(0, fresh, Ordering::AcqRel, Ordering::Acquire)
        {
          Ok(_) => fresh,
          Err(won) => won,
        }
      }
      key => key,
    }
  }

  /// Runs `f` on the calling thread's arena. `None` when the thread has no
  /// arena (and `create` is false or every slot is taken), when re-entered,
  /// or when thread-local storage is gone.
  fn with_arena<R>(&self, create: bool, f: impl FnOnce(&mut Arena) -> R) -> Option<R> {
    let key = self.key();
    let policy = self.policy;
    let enter = |registry: &UnsafeCell<Registry>| {
      let registry = unsafe { &mut *registry.get() };
      let arena = if create {
        registry.get_or_insert(key, policy)
      } else {
        registry.find(key)
      };
      arena.map(f)
    };

    // For dynamic linking (LD_PRELOAD), TLS may be destroyed during exit.
    #[cfg(feature = "dynamic")]
    {
      if IN_ALLOC.try_with(Cell::get).unwrap_or(true) {
        return None;
      }
      let _ = IN_ALLOC.try_with(|flag| flag.set(true));
      let result = ARENAS.try_with(enter).ok().flatten();
      let _ = IN_ALLOC.try_with(|flag| flag.set(false));
      result
    }

    #[cfg(not(feature = "dynamic"))]
    {
      IN_ALLOC.with(|flag| {
        if flag.get() {
          return None;
        }
        flag.set(true);
        let result = ARENAS.with(enter);
        flag.set(false);
        result
      })
    }
  }
}

impl<S> Drop for PerThread<S> {
  fn drop(&mut self) {
    let key = *self.key.get_mut();
    if key != 0 {
      let _ = ARENAS.try_with(|registry| unsafe { (*registry.get()).release(key) });
    }
  }
}
