//! In-place block encoding.
//!
//! Every block is bracketed by two identical boundary tags:
//!
//! ```text
//!   header tag                payload                 footer tag
//!   ┌────────────┬───────┬──────────────────────────┬────────────┬───────┐
//!   │ size|alloc │ owner │  next | prev | ...       │ size|alloc │ owner │
//!   └────────────┴───────┴──────────────────────────┴────────────┴───────┘
//!   ▲                    ▲                          ▲
//!   Block                payload (returned)         payload + size
//! ```
//!
//! `size` is the payload capacity. It is always a multiple of [`GRANULE`], so
//! the low bit carries the allocation flag. While a block is free, the first
//! two payload words hold its free-list links.
//!
//! This module is the only place that turns addresses into metadata reads and
//! writes. Everything else handles typed [`Block`] values.

use core::{mem::size_of, ptr::NonNull};

use crate::error::AllocError;

/// One machine word.
pub const WORD: usize = size_of::<usize>();

/// Size of one boundary tag (packed word + owner word).
pub const TAG_SIZE: usize = 2 * WORD;

/// Allocation granularity. Payload sizes and payload addresses are multiples of it.
pub const GRANULE: usize = 2 * WORD;

/// Metadata bytes carried by every block (header tag + footer tag).
pub const OVERHEAD: usize = 2 * TAG_SIZE;

/// Smallest payload a block may have; room for the two free-list links.
pub const MIN_PAYLOAD: usize = GRANULE;

/// Owner recorded in heap sentinels. Never a valid arena id.
pub const SENTINEL_OWNER: usize = 0;

/// Largest payload a request may round up to.
pub const MAX_PAYLOAD: usize = (isize::MAX as usize - OVERHEAD - 2 * TAG_SIZE) & !(GRANULE - 1);

const ALLOCATED: usize = 0x1;

const _: () = assert!(GRANULE.is_power_of_two());
const _: () = assert!(MIN_PAYLOAD >= 2 * WORD);
const _: () = assert!(OVERHEAD % GRANULE == 0);

/// Packs a payload size and allocation flag into one word.
#[inline(always)]
pub const fn encode(size: usize, allocated: bool) -> usize {
  size | allocated as usize
}

/// Inverse of [`encode`].
#[inline(always)]
pub const fn decode(word: usize) -> (usize, bool) {
  (word & !ALLOCATED, word & ALLOCATED != 0)
}

/// Rounds a payload request up to the granularity, with the minimum payload as floor.
pub fn round_request(size: usize) -> Result<usize, AllocError> {
  if size == 0 {
    return Err(AllocError::ZeroSize);
  }
  if size > MAX_PAYLOAD {
    return Err(AllocError::TooLarge { requested: size });
  }
  Ok(align_up(size, GRANULE).max(MIN_PAYLOAD))
}

/// Rounds `x` up to the next multiple of alignment `align`. Alignment must be a power of 2.
#[inline(always)]
pub const fn align_up(x: usize, align: usize) -> usize {
  let mask = align - 1;
  (x + mask) & !mask
}

/// One boundary tag as stored in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag {
  pub word: usize,
  pub owner: usize,
}

impl Tag {
  pub const SENTINEL: Tag = Tag {
    word: encode(0, true),
    owner: SENTINEL_OWNER,
  };

  pub const fn new(size: usize, allocated: bool, owner: usize) -> Self {
    Self {
      word: encode(size, allocated),
      owner,
    }
  }

  #[inline]
  pub const fn size(self) -> usize {
    decode(self.word).0
  }

  #[inline]
  pub const fn allocated(self) -> bool {
    decode(self.word).1
  }

  /// An epilogue pointing `distance` bytes ahead, at the next segment's prologue.
  pub const fn bridge(distance: usize) -> Self {
    Self::new(distance, true, SENTINEL_OWNER)
  }

  /// Prologue, epilogue or bridge.
  #[inline]
  pub const fn is_sentinel(self) -> bool {
    self.owner == SENTINEL_OWNER && self.allocated()
  }
}

/// Reads the boundary tag stored at `addr`.
///
/// # Safety
/// `addr` must be [`GRANULE`]-aligned and point at `TAG_SIZE` readable bytes of the heap.
#[inline]
pub unsafe fn read_tag(addr: usize) -> Tag {
  let p = addr as *const usize;
  unsafe {
    Tag {
      word: p.read(),
      owner: p.add(1).read(),
    }
  }
}

/// Writes a boundary tag at `addr`.
///
/// # Safety
/// `addr` must be [`GRANULE`]-aligned and point at `TAG_SIZE` writable bytes of the heap.
#[inline]
pub unsafe fn write_tag(addr: usize, tag: Tag) {
  let p = addr as *mut usize;
  unsafe {
    p.write(tag.word);
    p.add(1).write(tag.owner);
  }
}

/// Handle to a block, addressed by its header tag.
///
/// All accessors are `unsafe`: the handle must name a block that lies wholly
/// inside a heap segment and whose header is initialised.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Block(NonNull<u8>);

impl Block {
  /// # Safety
  /// `addr` must be non-zero and the address of a block header.
  #[inline]
  pub unsafe fn at(addr: usize) -> Self {
    Self(unsafe { NonNull::new_unchecked(addr as *mut u8) })
  }

  /// The block whose payload starts at `payload`.
  ///
  /// # Safety
  /// `payload` must have been produced by [`Block::payload`].
  #[inline]
  pub unsafe fn header_of(payload: NonNull<u8>) -> Self {
    unsafe { Self::at(payload.as_ptr() as usize - TAG_SIZE) }
  }

  #[inline]
  pub fn addr(self) -> usize {
    self.0.as_ptr() as usize
  }

  #[inline]
  pub fn payload(self) -> NonNull<u8> {
    unsafe { NonNull::new_unchecked(self.0.as_ptr().add(TAG_SIZE)) }
  }

  #[inline]
  pub unsafe fn header(self) -> Tag {
    unsafe { read_tag(self.addr()) }
  }

  /// Address of the footer tag: `payload + size`.
  #[inline]
  pub unsafe fn footer_of(self) -> usize {
    unsafe { self.addr() + TAG_SIZE + self.size() }
  }

  #[inline]
  pub unsafe fn footer(self) -> Tag {
    unsafe { read_tag(self.footer_of()) }
  }

  #[inline]
  pub unsafe fn size(self) -> usize {
    unsafe { self.header().size() }
  }

  #[inline]
  pub unsafe fn allocated(self) -> bool {
    unsafe { self.header().allocated() }
  }

  #[inline]
  pub unsafe fn owner(self) -> usize {
    unsafe { self.header().owner }
  }

  /// Bytes the block occupies, metadata included.
  #[inline]
  pub unsafe fn span(self) -> usize {
    unsafe { self.size() + OVERHEAD }
  }

  /// First address past the footer; the header of the physical successor.
  #[inline]
  pub unsafe fn end(self) -> usize {
    unsafe { self.addr() + self.span() }
  }

  /// Writes the header tag and mirrors it into the footer.
  ///
  /// Size and allocation state only ever change through here, so the two tags
  /// cannot disagree.
  #[inline]
  pub unsafe fn init(self, size: usize, allocated: bool, owner: usize) {
    debug_assert!(size % GRANULE == 0, "unaligned block size {size}");
    unsafe {
      write_tag(self.addr(), Tag::new(size, allocated, owner));
      self.set_footer();
    }
  }

  /// Copies the header tag to `payload + size`.
  #[inline]
  pub unsafe fn set_footer(self) {
    unsafe { write_tag(self.footer_of(), self.header()) }
  }

  #[inline]
  pub unsafe fn set_allocated(self, allocated: bool) {
    unsafe {
      let header = self.header();
      self.init(header.size(), allocated, header.owner);
    }
  }

  /// The physical successor (possibly the epilogue sentinel).
  #[inline]
  pub unsafe fn next_physical(self) -> Block {
    unsafe { Block::at(self.end()) }
  }

  /// The tag immediately before the header: the predecessor's footer or the prologue.
  #[inline]
  pub unsafe fn prev_footer(self) -> Tag {
    unsafe { read_tag(self.addr() - TAG_SIZE) }
  }

  /// The physical predecessor described by `footer` (as read by [`Block::prev_footer`]).
  #[inline]
  pub unsafe fn prev_physical(self, footer: Tag) -> Block {
    unsafe { Block::at(self.addr() - TAG_SIZE - footer.size() - TAG_SIZE) }
  }

  // Free-list links live in the first two payload words.

  #[inline]
  fn link_slot(self, index: usize) -> *mut usize {
    unsafe { self.payload().as_ptr().cast::<usize>().add(index) }
  }

  #[inline]
  pub unsafe fn next_free(self) -> Option<Block> {
    unsafe { NonNull::new(self.link_slot(0).read() as *mut u8).map(Block) }
  }

  #[inline]
  pub unsafe fn prev_free(self) -> Option<Block> {
    unsafe { NonNull::new(self.link_slot(1).read() as *mut u8).map(Block) }
  }

  #[inline]
  pub unsafe fn set_next_free(self, next: Option<Block>) {
    unsafe { self.link_slot(0).write(next.map_or(0, Block::addr)) }
  }

  #[inline]
  pub unsafe fn set_prev_free(self, prev: Option<Block>) {
    unsafe { self.link_slot(1).write(prev.map_or(0, Block::addr)) }
  }
}
