//! General purpose allocator built on a single growable arena. Free blocks
//! are kept in doubly linked lists segregated by power-of-two size class,
//! placement is best-fit within a class, and physically adjacent free blocks
//! are merged eagerly using boundary tags. The only system dependency is the
//! arena reservation in [`arena`]; everything else is pointer arithmetic over
//! bytes we own.
//!
//! High level picture of a heap after a few operations:
//!
//! ```text
//!                +------------------------------------------------------------+
//!                | pad | Prologue | Alloc | Free  | Alloc | Free   | Epilogue |
//!                +------------------------------------------------------------+
//!                                            ^               ^
//!                                            |               |
//!   buckets[5] ------------------------------+               |
//!   buckets[8] ----------------------------------------------+
//! ```
//!
//! Read [`block`] for the on-heap layout, [`freelist`] for the size class
//! table and [`heap`] for the allocation, free and resize algorithms.

use std::{error::Error, fmt, ptr::NonNull};

mod align;
mod arena;
mod block;
mod freelist;
mod heap;

/// Non-null pointer to `T`. We use this in most cases instead of `*mut T`
/// because the compiler will yell at us if we don't write code for the `None`
/// case. Bucket heads and the links stored inside free blocks are all
/// nullable, so this shows up everywhere.
pub type Pointer<T> = Option<NonNull<T>>;

/// Shorter syntax for allocation/reallocation return types. `Ok(None)` is
/// reserved for the zero size request, which is a valid call that hands out
/// no memory.
pub(crate) type AllocResult = Result<Pointer<u8>, OutOfMemory>;

/// The arena refused to grow. There is no partial failure, the heap is left
/// exactly as it was before the call that triggered the growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("arena limit reached")
    }
}

impl Error for OutOfMemory {}

pub use arena::Arena;
pub use heap::Heap;
