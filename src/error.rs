//! Allocation and release errors.

use std::error::Error;
use std::fmt;

/// Why an allocate call produced no pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocError {
  /// A zero-byte request. Defined no-op, not a crash.
  ZeroSize,
  /// Rounding the request (plus block metadata) overflows the address space.
  TooLarge {
    /// Payload bytes requested.
    requested: usize,
  },
  /// The heap source refused to grow.
  Exhausted {
    /// Payload bytes requested.
    requested: usize,
  },
  /// The calling thread has no arena available (TLS torn down, re-entered,
  /// or every per-thread slot is taken).
  NoArena,
}

impl fmt::Display for AllocError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::ZeroSize => write!(f, "zero-byte allocation request"),
      Self::TooLarge { requested } => {
        write!(f, "allocation of {requested} bytes overflows the heap layout")
      }
      Self::Exhausted { requested } => {
        write!(f, "heap exhausted: could not grow for {requested} bytes")
      }
      Self::NoArena => write!(f, "no arena available on this thread"),
    }
  }
}

impl Error for AllocError {}

/// A pointer handed to free that is not a live allocation of the arena.
///
/// Every variant is a caller contract violation. Front-ends that cannot
/// return an error abort through [`fatal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreeError {
  /// Outside the heap this arena grows.
  OutOfBounds { addr: usize },
  /// Not on the payload alignment, so never returned by an allocate call.
  Misaligned { addr: usize },
  /// The block is already free (double free) or is a sentinel.
  NotAllocated { addr: usize },
  /// Header and footer disagree, or the size runs past the heap end.
  Corrupt { addr: usize },
  /// The block belongs to another arena.
  ForeignArena {
    addr: usize,
    owner: usize,
    arena: usize,
  },
  /// The calling thread has no arena, so it cannot own the block.
  NoArena { addr: usize },
}

impl fmt::Display for FreeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::OutOfBounds { addr } => write!(f, "free of {addr:#x}: outside the managed heap"),
      Self::Misaligned { addr } => write!(f, "free of {addr:#x}: not a payload address"),
      Self::NotAllocated { addr } => write!(f, "free of {addr:#x}: block is not allocated"),
      Self::Corrupt { addr } => write!(f, "free of {addr:#x}: block metadata is corrupt"),
      Self::ForeignArena { addr, owner, arena } => write!(
        f,
        "free of {addr:#x}: block owned by arena {owner} released into arena {arena}"
      ),
      Self::NoArena { addr } => write!(f, "free of {addr:#x}: no arena on this thread"),
    }
  }
}

impl Error for FreeError {}

/// Reports an invalid free and terminates the process.
///
/// Continuing would corrupt the heap, so this never returns.
#[cold]
pub fn fatal(err: FreeError) -> ! {
  log::error!("{err}");
  std::process::abort()
}
