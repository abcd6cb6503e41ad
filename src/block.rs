use std::ptr::NonNull;

use crate::{
    align::{DWORD, WORD},
    Pointer,
};

/// Minimum block size in bytes. A free block must be able to hold a header,
/// a footer and the two list links of [`crate::freelist`], and an allocated
/// block of this size still leaves a double word of payload. Both add up to
/// the same number.
pub(crate) const MIN_BLOCK_SIZE: usize = 2 * DWORD;

/// Low bit of a boundary tag. Sizes are double word multiples so the low
/// bits are always zero and we can pack the allocation state in there.
const ALLOCATED: usize = 0x1;

/// Mask that recovers the size from a boundary tag.
const SIZE_MASK: usize = !0x7;

/// Handle to one heap block, identified by its payload address. Every block
/// is bounded by two one-word tags that both encode the total size and the
/// allocation state, which is what makes neighbor lookups O(1) in both
/// directions:
///
/// ```text
/// +-------------+
/// |  size | a   |  <- header, one word
/// +-------------+
/// |   payload   |  <- `BlockPtr` points here
/// |     ...     |     (holds the free list links while the block is free)
/// +-------------+
/// |  size | a   |  <- footer, one word
/// +-------------+
/// |  size | a   |  <- header of the next physical block
/// +-------------+
/// ```
///
/// `size` is the total span of the block including both tags, so the payload
/// capacity is always `size - DWORD`. The footer of the previous block sits
/// directly above our header, which is how [`BlockPtr::prev`] walks
/// backwards without any extra bookkeeping.
///
/// This is a plain copyable handle, not an owning pointer. All accessors are
/// unsafe because they read and write arena memory; callers must guarantee
/// the handle was derived from a live block of the same heap.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct BlockPtr(NonNull<u8>);

impl BlockPtr {
    /// Builds a handle from a payload address previously produced by this
    /// allocator.
    #[inline]
    pub fn from_payload(payload: NonNull<u8>) -> Self {
        Self(payload)
    }

    /// Address of the usable region, the pointer callers get to keep.
    #[inline]
    pub fn payload(self) -> NonNull<u8> {
        self.0
    }

    /// Address of the header tag.
    #[inline]
    fn header(self) -> *mut usize {
        unsafe { self.0.as_ptr().sub(WORD).cast() }
    }

    /// Address of the footer tag. Reads the header to know how far down the
    /// footer lives.
    #[inline]
    unsafe fn footer(self) -> *mut usize {
        self.0.as_ptr().add(self.size() - DWORD).cast()
    }

    /// Total block size in bytes, including both tags.
    #[inline]
    pub unsafe fn size(self) -> usize {
        *self.header() & SIZE_MASK
    }

    /// Whether the block is currently handed out.
    #[inline]
    pub unsafe fn is_allocated(self) -> bool {
        *self.header() & ALLOCATED != 0
    }

    /// Writes both boundary tags at once. Tags must never disagree, so this
    /// is the only way to change them.
    #[inline]
    pub unsafe fn write_tags(self, size: usize, allocated: bool) {
        let tag = size | allocated as usize;
        *self.header() = tag;
        *self.footer() = tag;
    }

    /// Writes the header tag only. The epilogue is the one block with no
    /// footer (its size is zero, there is nothing to span), so this is what
    /// installs and relocates it.
    #[inline]
    pub unsafe fn write_header(self, size: usize, allocated: bool) {
        *self.header() = size | allocated as usize;
    }

    /// Next physical block. Walking past the epilogue is the caller's bug,
    /// the epilogue is always allocated precisely so traversals stop there.
    #[inline]
    pub unsafe fn next(self) -> BlockPtr {
        BlockPtr(NonNull::new_unchecked(self.0.as_ptr().add(self.size())))
    }

    /// Previous physical block, found through its footer, which sits in the
    /// word right above our header.
    #[inline]
    pub unsafe fn prev(self) -> BlockPtr {
        let prev_size = *self.0.as_ptr().sub(DWORD).cast::<usize>() & SIZE_MASK;
        BlockPtr(NonNull::new_unchecked(self.0.as_ptr().sub(prev_size)))
    }

    /// Allocation state of the previous physical block, read from its footer
    /// without moving there.
    #[inline]
    pub unsafe fn prev_is_allocated(self) -> bool {
        *self.0.as_ptr().sub(DWORD).cast::<usize>() & ALLOCATED != 0
    }

    /// Predecessor link of a free block. The first payload word is ours to
    /// use while the block is free, the user has no pointer to it anymore.
    #[inline]
    pub unsafe fn pred(self) -> Pointer<u8> {
        NonNull::new(*self.0.as_ptr().cast::<*mut u8>())
    }

    /// Successor link of a free block, stored in the second payload word.
    #[inline]
    pub unsafe fn succ(self) -> Pointer<u8> {
        NonNull::new(*self.0.as_ptr().add(WORD).cast::<*mut u8>())
    }

    pub unsafe fn set_pred(self, pred: Pointer<u8>) {
        *self.0.as_ptr().cast::<*mut u8>() = raw(pred);
    }

    pub unsafe fn set_succ(self, succ: Pointer<u8>) {
        *self.0.as_ptr().add(WORD).cast::<*mut u8>() = raw(succ);
    }
}

#[inline]
fn raw(pointer: Pointer<u8>) -> *mut u8 {
    pointer.map_or(std::ptr::null_mut(), NonNull::as_ptr)
}
