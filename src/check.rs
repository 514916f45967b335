//! Heap consistency checker.
//!
//! Walks every block of a heap through its boundary tags and, for an arena,
//! cross-checks the free list against what the walk found. Meant for tests and
//! debugging: the heap must be quiescent while it runs.

use core::fmt;

use crate::{
  arena::{Arena, Insertion},
  heap::{Heap, HeapSource},
  layout::{Block, GRANULE, OVERHEAD, TAG_SIZE, Tag, read_tag},
};

/// What a walk counted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Report {
  /// Blocks visited, sentinels excluded.
  pub blocks: usize,
  /// Bytes spanned by allocated blocks.
  pub allocated: usize,
  /// Bytes spanned by free blocks.
  pub free: usize,
  pub free_blocks: usize,
  /// Payload size of the largest free block.
  pub largest_free: usize,
  /// Fenced segments, 0 for an empty heap.
  pub segments: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckError {
  /// A prologue, epilogue or bridge is missing or malformed.
  Sentinel { addr: usize },
  /// A block runs past the end of the heap.
  Truncated { addr: usize },
  /// A block size is not a multiple of the granularity.
  Misaligned { addr: usize },
  /// Header and footer disagree.
  TagMismatch { addr: usize },
  /// Two physically adjacent free blocks of one owner.
  Uncoalesced { addr: usize },
  /// The free list is inconsistent at `addr`.
  List { addr: usize, problem: &'static str },
  /// A counter disagrees with the walk.
  Mismatch {
    what: &'static str,
    walked: usize,
    recorded: usize,
  },
}

impl fmt::Display for CheckError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Sentinel { addr } => write!(f, "bad sentinel at {addr:#x}"),
      Self::Truncated { addr } => write!(f, "block at {addr:#x} runs past the heap end"),
      Self::Misaligned { addr } => write!(f, "block at {addr:#x} has an unaligned size"),
      Self::TagMismatch { addr } => write!(f, "block at {addr:#x}: header and footer differ"),
      Self::Uncoalesced { addr } => write!(f, "free block at {addr:#x} has a free successor"),
      Self::List { addr, problem } => write!(f, "free list at {addr:#x}: {problem}"),
      Self::Mismatch {
        what,
        walked,
        recorded,
      } => write!(f, "{what}: walked {walked}, recorded {recorded}"),
    }
  }
}

impl std::error::Error for CheckError {}

/// Walks the whole heap and checks it against its statistics.
///
/// # Safety
/// No allocation or release may run on `heap` during the walk.
pub unsafe fn walk<S: HeapSource>(heap: &Heap<S>) -> Result<Report, CheckError> {
  let report = unsafe { scan(heap, None)? };
  let snap = heap.stats().snapshot();
  if report.free != snap.free {
    return Err(CheckError::Mismatch {
      what: "free bytes",
      walked: report.free,
      recorded: snap.free,
    });
  }
  if report.allocated != snap.in_use() {
    return Err(CheckError::Mismatch {
      what: "allocated bytes",
      walked: report.allocated,
      recorded: snap.in_use(),
    });
  }
  Ok(report)
}

/// Walks the heap counting only `arena`'s blocks, then checks its free list.
///
/// # Safety
/// Same as [`walk`].
pub unsafe fn arena<S: HeapSource>(arena: &Arena, heap: &Heap<S>) -> Result<Report, CheckError> {
  let report = unsafe { scan(heap, Some(arena.id()))? };
  let list = arena.list();
  let ordered = arena.policy().insertion() == Insertion::AddressOrdered;

  let mut prev: Option<Block> = None;
  let mut count = 0;
  let mut bytes = 0;
  for block in unsafe { list.iter() } {
    let addr = block.addr();
    if count == report.free_blocks {
      return Err(CheckError::List {
        addr,
        problem: "more listed blocks than free blocks in the heap",
      });
    }
    if !heap.contains(addr, OVERHEAD) {
      return Err(CheckError::List {
        addr,
        problem: "outside the heap",
      });
    }
    let tag = unsafe { block.header() };
    if tag.allocated() {
      return Err(CheckError::List {
        addr,
        problem: "allocated block listed",
      });
    }
    if tag.owner != arena.id() {
      return Err(CheckError::List {
        addr,
        problem: "block of another arena listed",
      });
    }
    if unsafe { block.prev_free() } != prev {
      return Err(CheckError::List {
        addr,
        problem: "back link does not match",
      });
    }
    if ordered && prev.is_some_and(|p| p >= block) {
      return Err(CheckError::List {
        addr,
        problem: "out of address order",
      });
    }
    count += 1;
    bytes += unsafe { block.span() };
    prev = Some(block);
  }

  if list.tail() != prev {
    return Err(CheckError::List {
      addr: prev.map_or(0, Block::addr),
      problem: "tail is not the last block",
    });
  }
  for (what, walked, recorded) in [
    ("list length", count, list.len()),
    ("free blocks", report.free_blocks, count),
    ("free bytes", report.free, bytes),
  ] {
    if walked != recorded {
      return Err(CheckError::Mismatch {
        what,
        walked,
        recorded,
      });
    }
  }
  Ok(report)
}

/// Validates every block and tallies those owned by `owner` (all if `None`).
unsafe fn scan<S: HeapSource>(heap: &Heap<S>, owner: Option<usize>) -> Result<Report, CheckError> {
  let mut report = Report::default();
  let (lo, hi) = heap.bounds();
  if lo == 0 {
    return Ok(report);
  }

  let mut addr = lo;
  let mut free_run: Option<usize> = None;
  loop {
    // At a prologue.
    if unsafe { read_tag(addr) } != Tag::SENTINEL {
      return Err(CheckError::Sentinel { addr });
    }
    report.segments += 1;
    addr += TAG_SIZE;

    loop {
      if addr + TAG_SIZE > hi {
        return Err(CheckError::Truncated { addr });
      }
      let tag = unsafe { read_tag(addr) };
      if tag.is_sentinel() {
        break;
      }

      let size = tag.size();
      if size % GRANULE != 0 || size == 0 {
        return Err(CheckError::Misaligned { addr });
      }
      let block = unsafe { Block::at(addr) };
      if addr + size + OVERHEAD + TAG_SIZE > hi {
        return Err(CheckError::Truncated { addr });
      }
      if unsafe { block.footer() } != tag {
        return Err(CheckError::TagMismatch { addr });
      }

      if tag.allocated() {
        free_run = None;
      } else {
        if free_run == Some(tag.owner) {
          return Err(CheckError::Uncoalesced { addr });
        }
        free_run = Some(tag.owner);
      }

      if owner.is_none_or(|id| id == tag.owner) {
        report.blocks += 1;
        if tag.allocated() {
          report.allocated += size + OVERHEAD;
        } else {
          report.free += size + OVERHEAD;
          report.free_blocks += 1;
          report.largest_free = report.largest_free.max(size);
        }
      }
      addr = unsafe { block.end() };
    }

    // At an epilogue or bridge.
    let tag = unsafe { read_tag(addr) };
    if tag.size() == 0 {
      if addr + TAG_SIZE != hi {
        return Err(CheckError::Sentinel { addr });
      }
      return Ok(report);
    }
    addr += tag.size();
    free_run = None;
  }
}
