//! Heap statistics.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Running counters of one heap.
///
/// `reserved` only grows. `free` moves on every grow/split/coalesce/free and
/// stays within `0..=reserved`.
pub struct Stats {
  reserved: AtomicUsize,
  free: AtomicUsize,
  fenced: AtomicUsize,
}

/// A point-in-time copy of [`Stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
  /// Total bytes ever obtained from the heap source.
  pub reserved: usize,
  /// Bytes spanned by free blocks (payload and boundary tags).
  pub free: usize,
  /// Bytes spent on sentinels and alignment padding.
  pub fenced: usize,
}

impl Snapshot {
  /// Bytes spanned by allocated blocks.
  pub fn in_use(&self) -> usize {
    self.reserved - self.free - self.fenced
  }
}

impl Stats {
  pub const fn new() -> Self {
    Self {
      reserved: AtomicUsize::new(0),
      free: AtomicUsize::new(0),
      fenced: AtomicUsize::new(0),
    }
  }

  #[inline]
  pub fn reserved(&self) -> usize {
    self.reserved.load(Ordering::Relaxed)
  }

  #[inline]
  pub fn free(&self) -> usize {
    self.free.load(Ordering::Relaxed)
  }

  pub fn snapshot(&self) -> Snapshot {
    Snapshot {
      reserved: self.reserved(),
      free: self.free(),
      fenced: self.fenced.load(Ordering::Relaxed),
    }
  }

  #[inline]
  pub(crate) fn add_reserved(&self, bytes: usize, fenced: usize) {
    self.reserved.fetch_add(bytes, Ordering::Relaxed);
    self.fenced.fetch_add(fenced, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn add_free(&self, bytes: usize) {
    self.free.fetch_add(bytes, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn sub_free(&self, bytes: usize) {
    let prev = self.free.fetch_sub(bytes, Ordering::Relaxed);
    debug_assert!(prev >= bytes, "free bytes underflow: {prev} - {bytes}");
  }
}

impl Default for Stats {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn in_use_is_the_remainder() {
    let stats = Stats::new();
    stats.add_reserved(256, 32);
    stats.add_free(64);
    let snap = stats.snapshot();
    assert_eq!(snap.reserved, 256);
    assert_eq!(snap.in_use(), 256 - 64 - 32);

    stats.sub_free(64);
    assert_eq!(stats.free(), 0);
  }
}
