//! Process-wide allocators over the program break, and their C entry points.
//!
//! | Entry points                          | Allocator                      |
//! |---------------------------------------|--------------------------------|
//! | `ff_malloc`, `bf_malloc`, `*_free`    | [`unlocked`], first / best fit |
//! | `ts_malloc_lock`, `ts_free_lock`      | [`locked`], best fit           |
//! | `ts_malloc_nolock`, `ts_free_nolock`  | [`per_thread`], best fit       |
//!
//! The symbols are always compiled; the `c_api` feature exports them unmangled.

use core::ptr::{NonNull, null_mut};

use libc::c_ulong;

use crate::{
  error::{AllocError, FreeError, fatal},
  family::{Locked, PerThread, Unlocked},
  fit::Fit,
  heap::Sbrk,
};

static UNLOCKED: Unlocked<Sbrk> = Unlocked::new(Sbrk);
static LOCKED: Locked<Sbrk> = Locked::new(Sbrk, Fit::Best);
static PER_THREAD: PerThread<Sbrk> = PerThread::new(Sbrk, Fit::Best);

/// The single-threaded allocator behind `ff_*` and `bf_*`.
pub fn unlocked() -> &'static Unlocked<Sbrk> {
  &UNLOCKED
}

/// The lock-serialized allocator behind `ts_*_lock`.
pub fn locked() -> &'static Locked<Sbrk> {
  &LOCKED
}

/// The per-thread allocator behind `ts_*_nolock`.
pub fn per_thread() -> &'static PerThread<Sbrk> {
  &PER_THREAD
}

/// Bytes obtained from the break by all process-wide allocators.
pub fn data_segment_size() -> usize {
  UNLOCKED.stats().reserved + LOCKED.stats().reserved + PER_THREAD.stats().reserved
}

/// Bytes spanned by free blocks across all process-wide allocators.
pub fn data_segment_free_space_size() -> usize {
  UNLOCKED.stats().free + LOCKED.stats().free + PER_THREAD.stats().free
}

fn into_raw(result: Result<NonNull<u8>, AllocError>) -> *mut u8 {
  match result {
    Ok(ptr) => ptr.as_ptr(),
    Err(AllocError::ZeroSize) => null_mut(),
    Err(err) => {
      log::warn!("{err}");
      null_mut()
    }
  }
}

fn release(ptr: *mut u8, free: impl FnOnce(NonNull<u8>) -> Result<(), FreeError>) {
  let Some(ptr) = NonNull::new(ptr) else {
    return;
  };
  if let Err(err) = free(ptr) {
    fatal(err);
  }
}

// =============================================================================
// C API (exported with --features c_api)
// =============================================================================

/// # Safety
/// Must not run concurrently with any other `ff_*` or `bf_*` call.
#[cfg_attr(feature = "c_api", unsafe(no_mangle))]
pub unsafe extern "C" fn ff_malloc(size: usize) -> *mut u8 {
  into_raw(unsafe { UNLOCKED.allocate(size, Fit::First) })
}

/// # Safety
/// As [`ff_malloc`]; `ptr` must be null or come from `ff_malloc`/`bf_malloc`.
#[cfg_attr(feature = "c_api", unsafe(no_mangle))]
pub unsafe extern "C" fn ff_free(ptr: *mut u8) {
  release(ptr, |p| unsafe { UNLOCKED.free(p) })
}

/// # Safety
/// As [`ff_malloc`].
#[cfg_attr(feature = "c_api", unsafe(no_mangle))]
pub unsafe extern "C" fn bf_malloc(size: usize) -> *mut u8 {
  into_raw(unsafe { UNLOCKED.allocate(size, Fit::Best) })
}

/// # Safety
/// As [`ff_free`].
#[cfg_attr(feature = "c_api", unsafe(no_mangle))]
pub unsafe extern "C" fn bf_free(ptr: *mut u8) {
  release(ptr, |p| unsafe { UNLOCKED.free(p) })
}

#[cfg_attr(feature = "c_api", unsafe(no_mangle))]
pub extern "C" fn ts_malloc_lock(size: usize) -> *mut u8 {
  into_raw(LOCKED.allocate(size))
}

/// # Safety
/// `ptr` must be null or come from `ts_malloc_lock`.
#[cfg_attr(feature = "c_api", unsafe(no_mangle))]
pub unsafe extern "C" fn ts_free_lock(ptr: *mut u8) {
  release(ptr, |p| unsafe { LOCKED.free(p) })
}

#[cfg_attr(feature = "c_api", unsafe(no_mangle))]
pub extern "C" fn ts_malloc_nolock(size: usize) -> *mut u8 {
  into_raw(PER_THREAD.allocate(size))
}

/// # Safety
/// `ptr` must be null or come from `ts_malloc_nolock` on the calling thread.
#[cfg_attr(feature = "c_api", unsafe(no_mangle))]
pub unsafe extern "C" fn ts_free_nolock(ptr: *mut u8) {
  release(ptr, |p| unsafe { PER_THREAD.free(p) })
}

#[cfg_attr(feature = "c_api", unsafe(no_mangle))]
pub extern "C" fn get_data_segment_size() -> c_ulong {
  data_segment_size() as c_ulong
}

#[cfg_attr(feature = "c_api", unsafe(no_mangle))]
pub extern "C" fn get_data_segment_free_space_size() -> c_ulong {
  data_segment_free_space_size() as c_ulong
}
