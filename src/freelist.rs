use crate::{block::BlockPtr, Pointer};

/// Number of size class buckets. The last one is a catch-all, so classes go
/// `[2^0, 2^1) .. [2^11, 2^12)` plus everything of 4096 bytes and above. The
/// catch-all threshold matches the minimum arena growth on purpose: every
/// block the heap gains by extending lands in the catch-all, where any
/// request too big for the exact classes will look for it. The low buckets
/// can never hold anything because blocks have a minimum size, but indexing
/// straight by bit length keeps [`SegregatedList::bucket_for`] branchless
/// and the table is 13 words, nobody will miss them.
pub(crate) const BUCKET_COUNT: usize = 13;

/// Free block bookkeeping. Each bucket is an intrusive doubly linked list
/// threaded through the payloads of the free blocks themselves, see
/// [`crate::block::BlockPtr::pred`]. The table only stores the heads:
///
/// ```text
/// buckets[5]  ->  Free (32)   <->  Free (48)  <->  Free (32)
/// buckets[6]  ->  Free (64)
/// buckets[7]  ->  None
/// buckets[12] ->  Free (8192) <->  Free (4096)
/// ```
///
/// Insertion is LIFO so there is no ordering within a bucket, a block of 48
/// bytes may sit before or after one of 32. What must always hold is that a
/// free block lives in exactly the bucket matching its current size; any
/// code that changes the size of a free block has to pull it out first and
/// reinsert it afterwards.
pub(crate) struct SegregatedList {
    /// Head of each bucket's list, `None` when the bucket is empty. Links
    /// are payload addresses, same currency as [`BlockPtr`].
    buckets: [Pointer<u8>; BUCKET_COUNT],
}

impl SegregatedList {
    pub const fn new() -> Self {
        Self {
            buckets: [None; BUCKET_COUNT],
        }
    }

    /// Maps a block size to its bucket index: the bit length of `size` minus
    /// one, capped at the catch-all. O(1), no loops, no table.
    #[inline]
    pub fn bucket_for(size: usize) -> usize {
        debug_assert!(size > 0);
        let class = (usize::BITS - size.leading_zeros() - 1) as usize;
        class.min(BUCKET_COUNT - 1)
    }

    /// Head of the bucket at `index`, for scanning.
    #[inline]
    pub fn bucket(&self, index: usize) -> Pointer<u8> {
        self.buckets[index]
    }

    /// Pushes `block` onto the front of the bucket matching its size.
    ///
    /// # Safety
    ///
    /// `block` must be a live free block that is not currently linked into
    /// any bucket, with its tags already written.
    pub unsafe fn insert(&mut self, block: BlockPtr) {
        let index = Self::bucket_for(block.size());
        let head = self.buckets[index];

        block.set_pred(None);
        block.set_succ(head);

        if let Some(head) = head {
            BlockPtr::from_payload(head).set_pred(Some(block.payload()));
        }

        self.buckets[index] = Some(block.payload());
    }

    /// Unlinks `block` from its bucket in O(1) using its own links.
    ///
    /// # Safety
    ///
    /// `block` must currently be linked into the bucket matching its size,
    /// so this has to run before any code that rewrites the block's tags.
    pub unsafe fn remove(&mut self, block: BlockPtr) {
        let index = Self::bucket_for(block.size());

        match block.pred() {
            // Head of the bucket, the table itself points at us.
            None => self.buckets[index] = block.succ(),
            Some(pred) => BlockPtr::from_payload(pred).set_succ(block.succ()),
        }

        if let Some(succ) = block.succ() {
            BlockPtr::from_payload(succ).set_pred(block.pred());
        }
    }
}
