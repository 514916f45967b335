//! Heap extension.
//!
//! A [`Heap`] wraps the one primitive that makes memory available: "give me `n`
//! more bytes contiguous with the current end, or fail". It owns the heap end,
//! serializes every extension behind its lock and keeps the reserved-bytes
//! counter.
//!
//! Every segment the heap hands out is bracketed by sentinels:
//!
//! ```text
//!   ┌─────┬──────────┬─────────┬─────────┬─────────┬──────────┐
//!   │ pad │ prologue │ block A │ block B │   ...   │ epilogue │
//!   └─────┴──────────┴─────────┴─────────┴─────────┴──────────┘
//!                                                             ▲ end
//! ```
//!
//! Sentinels are allocated boundary tags owned by no arena, so neighbour
//! inspection stops at them. Contiguous growth turns the old epilogue into the
//! header of the new block. If somebody else moved the break in between, a new
//! fenced segment is started instead and the old epilogue becomes a bridge
//! recording the distance to the new prologue, so the heap stays walkable.

use core::{
  ptr::NonNull,
  sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
  error::AllocError,
  layout::{Block, GRANULE, OVERHEAD, TAG_SIZE, Tag, align_up, write_tag},
  lock::{SpinLock, SpinMutex},
  stats::Stats,
};

/// A source of memory that only ever grows at its end.
///
/// # Safety
/// A successful `extend(n)` must return the previous end of the region, and
/// the `n` bytes after it must be readable, writable, unused by anything else
/// and remain valid for the rest of the process. `extend(0)` must not change
/// the region. Returned addresses never decrease.
pub unsafe trait HeapSource: Send {
  fn extend(&mut self, bytes: usize) -> Option<NonNull<u8>>;
}

// =============================================================================
// Sources
// =============================================================================

/// Serializes every `sbrk` issued by this crate, across all heaps.
static SBRK_LOCK: SpinLock = SpinLock::new();

/// The process break, grown with `sbrk(2)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sbrk;

unsafe impl HeapSource for Sbrk {
  fn extend(&mut self, bytes: usize) -> Option<NonNull<u8>> {
    let increment = libc::intptr_t::try_from(bytes).ok()?;

    SBRK_LOCK.lock();
    let old = unsafe { libc::sbrk(increment) };
    SBRK_LOCK.unlock();

    if old as isize == -1 {
      None
    } else {
      NonNull::new(old.cast::<u8>())
    }
  }
}

/// A private region reserved up front with `mmap`, handed out like a break.
///
/// Pages are committed lazily by the kernel as the break passes over them.
/// The mapping is never released.
#[derive(Debug)]
pub struct Reserved {
  base: usize,
  brk: usize,
  limit: usize,
}

impl Reserved {
  /// Reserves `capacity` bytes (rounded up to whole pages).
  pub fn new(capacity: usize) -> Option<Self> {
    let page = page_size();
    let capacity = capacity.checked_add(page - 1)? & !(page - 1);
    let raw = unsafe { os_mmap(capacity) };
    if raw.is_null() {
      log::warn!("reserving {capacity} bytes failed");
      return None;
    }

    log::debug!("reserved {capacity} bytes at {raw:p}");
    let base = raw as usize;
    Some(Self {
      base,
      brk: base,
      limit: base + capacity,
    })
  }

  pub fn capacity(&self) -> usize {
    self.limit - self.base
  }
}

unsafe impl HeapSource for Reserved {
  fn extend(&mut self, bytes: usize) -> Option<NonNull<u8>> {
    if bytes > self.limit - self.brk {
      return None;
    }
    let old = self.brk;
    self.brk += bytes;
    NonNull::new(old as *mut u8)
  }
}

fn page_size() -> usize {
  match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
    n if n > 0 => n as usize,
    _ => 4096,
  }
}

unsafe fn os_mmap(size: usize) -> *mut u8 {
  let ptr = unsafe {
    libc::mmap(
      core::ptr::null_mut(),
      size,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
      -1,
      0,
    )
  };

  if ptr == libc::MAP_FAILED {
    core::ptr::null_mut()
  } else {
    ptr as *mut u8
  }
}

// =============================================================================
// Heap
// =============================================================================

struct Segment<S> {
  source: S,
  /// Where the source's region ends after our last extension; 0 before first use.
  brk: usize,
}

/// A growable heap over a [`HeapSource`].
pub struct Heap<S> {
  segment: SpinMutex<Segment<S>>,
  /// Address of the first prologue, recorded once.
  base: AtomicUsize,
  /// One past the last epilogue.
  end: AtomicUsize,
  stats: Stats,
}

impl<S: HeapSource> Heap<S> {
  pub const fn new(source: S) -> Self {
    Self {
      segment: SpinMutex::new(Segment { source, brk: 0 }),
      base: AtomicUsize::new(0),
      end: AtomicUsize::new(0),
      stats: Stats::new(),
    }
  }

  pub fn stats(&self) -> &Stats {
    &self.stats
  }

  /// `(lowest, end)` of the managed region; `(0, 0)` before the first growth.
  #[inline]
  pub fn bounds(&self) -> (usize, usize) {
    (
      self.base.load(Ordering::Acquire),
      self.end.load(Ordering::Acquire),
    )
  }

  /// Whether `[addr, addr + len)` lies inside the managed region.
  #[inline]
  pub fn contains(&self, addr: usize, len: usize) -> bool {
    let (lo, hi) = self.bounds();
    lo != 0 && addr >= lo && addr.checked_add(len).is_some_and(|e| e <= hi)
  }

  /// Grows the heap by one allocated block with `size` payload bytes owned by `owner`.
  ///
  /// Nothing is written and no counter moves unless the source grants the memory.
  pub(crate) fn grow(&self, size: usize, owner: usize) -> Result<Block, AllocError> {
    let span = size + OVERHEAD;
    let exhausted = AllocError::Exhausted { requested: size };
    let mut seg = self.segment.lock();

    let (start, have) = if seg.brk != 0 {
      let old = seg.source.extend(span).ok_or(exhausted)?.as_ptr() as usize;
      if old == seg.brk {
        // Old epilogue becomes the new header.
        let block = unsafe { Block::at(old - TAG_SIZE) };
        unsafe {
          block.init(size, true, owner);
          write_tag(block.end(), Tag::SENTINEL);
        }
        seg.brk = old + span;
        self.end.store(seg.brk, Ordering::Release);
        self.stats.add_reserved(span, 0);
        return Ok(block);
      }
      (old, span)
    } else {
      let have = span + 2 * TAG_SIZE;
      let old = seg.source.extend(have).ok_or(exhausted)?.as_ptr() as usize;
      (old, have)
    };

    // Fresh segment: pad | prologue | block | epilogue.
    let pad = align_up(start, GRANULE) - start;
    let need = pad + TAG_SIZE + span + TAG_SIZE;
    if need > have {
      // Whatever we got but cannot use stays reserved and fenced.
      match seg.source.extend(need - have) {
        Some(more) if more.as_ptr() as usize == start + have => {}
        Some(_) => {
          self.stats.add_reserved(need, need);
          return Err(exhausted);
        }
        None => {
          self.stats.add_reserved(have, have);
          return Err(exhausted);
        }
      }
    }
    let total = need.max(have);

    let prologue = start + pad;
    let block = unsafe { Block::at(prologue + TAG_SIZE) };
    unsafe {
      write_tag(prologue, Tag::SENTINEL);
      block.init(size, true, owner);
      write_tag(block.end(), Tag::SENTINEL);
      if seg.brk != 0 {
        let epilogue = seg.brk - TAG_SIZE;
        write_tag(epilogue, Tag::bridge(prologue - epilogue));
      }
    }

    seg.brk = start + total;
    let _ = self
      .base
      .compare_exchange(0, prologue, Ordering::AcqRel, Ordering::Relaxed);
    self.end.store(seg.brk, Ordering::Release);
    self.stats.add_reserved(total, total - span);
    Ok(block)
  }
}
