//! A boundary-tag free-list allocator on top of the program break.
//!
//! ```text
//!   request ─► Arena ─► Fit::select ─► hit:  split or hand out whole
//!                                   └► miss: Heap::grow (one block)
//!   free    ─► validate ─► relink ─► coalesce with free neighbours
//! ```
//!
//! One [`Arena`] type, configured by a [`Policy`], backs three shapes:
//! [`Unlocked`], [`Locked`] (also a `GlobalAlloc`) and [`PerThread`]. Memory
//! comes from a [`HeapSource`]: [`Sbrk`] for the process-wide singletons in
//! [`capi`], or a private [`Reserved`] region.

#![allow(clippy::missing_safety_doc)]

pub mod arena;
pub mod capi;
pub mod check;
pub mod error;
pub mod family;
pub mod fit;
pub mod heap;
pub mod layout;
pub mod list;
mod lock;
pub mod stats;

pub use arena::{Arena, Coalesce, Insertion, Policy};
pub use check::{CheckError, Report};
pub use error::{AllocError, FreeError};
pub use family::{Locked, PerThread, Unlocked};
pub use fit::Fit;
pub use heap::{Heap, HeapSource, Reserved, Sbrk};
pub use stats::{Snapshot, Stats};
