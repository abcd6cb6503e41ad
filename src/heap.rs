use std::ptr::{self, NonNull};

use crate::{
    align::{round_dword, DWORD, WORD},
    arena::Arena,
    block::{BlockPtr, MIN_BLOCK_SIZE},
    freelist::SegregatedList,
    AllocResult, OutOfMemory, Pointer,
};

/// Default arena reservation, see [`Heap::init`].
const DEFAULT_LIMIT: usize = 16 << 20;

/// Minimum heap extension. Growing one block at a time would make every
/// fit miss a system call, so small requests grow the arena by this much and
/// the surplus becomes one free block.
const GROWTH_CHUNK: usize = 4096;

/// The allocator itself. Owns one [`Arena`] and carves it into blocks. The
/// managed range always looks like this:
///
/// ```text
///        +-----+----------+-------+-------+-- ... --+-------+----------+
///        | pad | Prologue | Block | Block |         | Block | Epilogue |
///        +-----+----------+-------+-------+-- ... --+-------+----------+
///        ^                                                             ^
///      arena base                                                arena break
/// ```
///
/// The prologue is a minimum size block that is permanently allocated and
/// the epilogue is a lone zero size header that is rewritten one growth
/// further out every time the arena is extended. Neither is ever handed to a
/// caller; they exist so that the boundary tag walks in [`Heap::coalesce`]
/// can look at "the previous block" and "the next block" unconditionally,
/// with no edge cases at either end of the range.
///
/// Two invariants hold between public calls:
///
/// 1. No two physically adjacent blocks are both free. Freeing merges
///    eagerly, so fragmentation only comes from free blocks separated by
///    live ones.
/// 2. Every free block is linked in the [`SegregatedList`] bucket matching
///    its current size, and only allocated blocks are unlinked.
///
/// Not thread safe and not re-entrant, every method needs `&mut self`. Wrap
/// the heap in a lock if multiple threads must share it.
pub struct Heap {
    /// The growable byte range everything below lives in.
    arena: Arena,
    /// Size class table of free blocks.
    free_lists: SegregatedList,
    /// The permanently allocated block at the bottom of the range. Kept
    /// around as the anchor for full heap walks.
    prologue: BlockPtr,
}

impl Heap {
    /// Creates a heap backed by a reservation of [`DEFAULT_LIMIT`] bytes.
    /// This establishes the prologue and epilogue and performs the first
    /// arena growth, so a heap that was built successfully can always serve
    /// at least one small allocation without touching the system again.
    pub fn init() -> Result<Self, OutOfMemory> {
        Self::with_limit(DEFAULT_LIMIT)
    }

    /// Same as [`Heap::init`] with an explicit reservation limit. Once the
    /// limit is reached, allocations fail with [`OutOfMemory`] until
    /// something is freed.
    pub fn with_limit(limit: usize) -> Result<Self, OutOfMemory> {
        let mut arena = Arena::new(limit)?;

        // One padding word plus prologue header, two link words, prologue
        // footer and the initial epilogue header. The padding keeps every
        // payload on a double word boundary.
        let base = arena.extend(3 * DWORD)?;

        let prologue = unsafe {
            base.as_ptr().cast::<usize>().write(0);

            let prologue =
                BlockPtr::from_payload(NonNull::new_unchecked(base.as_ptr().add(DWORD)));
            prologue.write_tags(MIN_BLOCK_SIZE, true);
            prologue.set_pred(None);
            prologue.set_succ(None);
            prologue.next().write_header(0, true);

            prologue
        };

        let mut heap = Self {
            arena,
            free_lists: SegregatedList::new(),
            prologue,
        };

        unsafe { heap.extend(GROWTH_CHUNK)? };

        Ok(heap)
    }

    /// Returns a pointer to at least `size` usable bytes, aligned to the
    /// double word. A zero size request is answered with `Ok(None)` without
    /// touching the heap; the only error is the arena refusing to grow.
    pub fn allocate(&mut self, size: usize) -> AllocResult {
        if size == 0 {
            return Ok(None);
        }

        unsafe { self.allocate_sized(size).map(Some) }
    }

    /// Releases a block back to the heap, merging it with any free physical
    /// neighbor on the spot.
    ///
    /// # Safety
    ///
    /// `payload` must have been returned by [`Heap::allocate`] or
    /// [`Heap::resize`] on this same heap and not freed since. Double frees
    /// and foreign pointers corrupt the boundary tags, nothing here detects
    /// them.
    pub unsafe fn free(&mut self, payload: NonNull<u8>) {
        let block = BlockPtr::from_payload(payload);

        block.write_tags(block.size(), false);
        self.coalesce(block);
    }

    /// Grows or shrinks an allocation to `new_size` bytes. A null `payload`
    /// behaves like [`Heap::allocate`] and a zero `new_size` behaves like
    /// [`Heap::free`], returning `Ok(None)`.
    ///
    /// Shrinking never moves the block or carves it up, the pointer comes
    /// back unchanged. Growing first tries to absorb the next physical block
    /// when it is free and large enough, which also keeps the pointer; only
    /// if that fails is the content moved to a fresh allocation. On
    /// [`OutOfMemory`] the original block is left untouched and still valid.
    ///
    /// # Safety
    ///
    /// Same contract as [`Heap::free`] for a non-null `payload`.
    pub unsafe fn resize(&mut self, payload: Pointer<u8>, new_size: usize) -> AllocResult {
        let Some(address) = payload else {
            return self.allocate(new_size);
        };

        if new_size == 0 {
            self.free(address);
            return Ok(None);
        }

        let block = BlockPtr::from_payload(address);
        let old_size = block.size();

        // round_word(new_size + DWORD), checked: a size this close to
        // `usize::MAX` can never be satisfied, only reported.
        let required = match new_size.checked_add(DWORD + WORD - 1) {
            Some(padded) => padded & !(WORD - 1),
            None => return Err(OutOfMemory),
        };

        // Shrink, or a growth that still fits in the slack the placement
        // rounding left behind. Keeping the whole block is deliberate, a
        // split here would trade an O(1) return for free list churn.
        if required <= old_size {
            return Ok(Some(address));
        }

        // The block right after us may be free, in which case absorbing it
        // grows the allocation without copying a single byte.
        let next = block.next();
        if !next.is_allocated() && old_size + next.size() >= required {
            let combined = old_size + next.size();
            self.free_lists.remove(next);
            block.write_tags(combined, true);
            return Ok(Some(address));
        }

        // No luck, relocate. Allocate first so the old content survives if
        // the arena is exhausted.
        let new_address = self.allocate_sized(new_size)?;

        ptr::copy_nonoverlapping(
            address.as_ptr(),
            new_address.as_ptr(),
            usize::min(old_size - DWORD, new_size),
        );

        self.free(address);

        Ok(Some(new_address))
    }

    /// [`Heap::allocate`] with the zero size case already ruled out, shared
    /// with the relocating path of [`Heap::resize`].
    unsafe fn allocate_sized(&mut self, size: usize) -> Result<NonNull<u8>, OutOfMemory> {
        let asize = admissible_size(size).ok_or(OutOfMemory)?;

        let block = match self.find_fit(asize) {
            Some(block) => block,
            // The extension is at least `asize` and comes back already
            // coalesced with whatever free block sat at the old boundary,
            // so it always fits.
            None => self.extend(asize)?,
        };

        self.place(block, asize);

        Ok(block.payload())
    }

    /// Grows the arena by `size` bytes (at least [`GROWTH_CHUNK`], rounded
    /// to a double word multiple), turns the new range into one free block
    /// and relocates the epilogue behind it. The block is merged with the
    /// old trailing block if that one was free, and the merged result is
    /// returned registered in the free lists.
    unsafe fn extend(&mut self, size: usize) -> Result<BlockPtr, OutOfMemory> {
        let size = round_dword(size.max(GROWTH_CHUNK));

        // The old break is one word past the old epilogue header, so the
        // new block's header lands exactly on top of it.
        let block = BlockPtr::from_payload(self.arena.extend(size)?);

        block.write_tags(size, false);
        block.next().write_header(0, true);

        Ok(self.coalesce(block))
    }

    /// Merges `block` with its free physical neighbors and registers the
    /// result in the free lists. Four cases by symmetry:
    ///
    /// ```text
    ///   Alloc | block | Alloc      ->   Alloc |    block     | Alloc
    ///   Alloc | block | Free       ->   Alloc |        block'       |
    ///   Free  | block | Alloc      ->   |       block'       | Alloc
    ///   Free  | block | Free       ->   |           block'          |
    /// ```
    ///
    /// Neighbors are pulled out of their buckets before their tags are
    /// overwritten; the merged block is inserted by its new size. This runs
    /// after every free and after every extension, which is what keeps
    /// adjacent free blocks from ever coexisting.
    unsafe fn coalesce(&mut self, block: BlockPtr) -> BlockPtr {
        let prev_free = !block.prev_is_allocated();
        let next = block.next();
        let next_free = !next.is_allocated();

        let mut merged = block;
        let mut size = block.size();

        if next_free {
            self.free_lists.remove(next);
            size += next.size();
        }

        if prev_free {
            let prev = block.prev();
            self.free_lists.remove(prev);
            size += prev.size();
            merged = prev;
        }

        if prev_free || next_free {
            merged.write_tags(size, false);
        }

        self.free_lists.insert(merged);

        merged
    }

    /// Best-fit search for a free block of at least `asize` bytes. Only the
    /// bucket `asize` maps to is scanned: the smaller classes cannot hold an
    /// admissible block by construction, and a miss here means extending the
    /// arena is cheaper than trawling the bigger classes. Within the bucket
    /// the smallest admissible block wins, with an early exit on an exact
    /// match.
    unsafe fn find_fit(&self, asize: usize) -> Option<BlockPtr> {
        let mut cursor = self.free_lists.bucket(SegregatedList::bucket_for(asize));
        let mut best: Option<(BlockPtr, usize)> = None;

        while let Some(payload) = cursor {
            let block = BlockPtr::from_payload(payload);
            let size = block.size();

            if size == asize {
                return Some(block);
            }

            if size > asize && best.map_or(true, |(_, best_size)| size < best_size) {
                best = Some((block, size));
            }

            cursor = block.succ();
        }

        best.map(|(block, _)| block)
    }

    /// Carves an allocation of `asize` bytes out of the free `block`. When
    /// the residual is big enough to live on its own it becomes a new free
    /// block, otherwise the caller gets the whole thing and the difference
    /// is internal fragmentation.
    unsafe fn place(&mut self, block: BlockPtr, asize: usize) {
        let csize = block.size();

        self.free_lists.remove(block);

        if csize - asize >= MIN_BLOCK_SIZE {
            block.write_tags(asize, true);

            let rest = block.next();
            rest.write_tags(csize - asize, false);
            self.free_lists.insert(rest);
        } else {
            block.write_tags(csize, true);
        }
    }
}

/// Smallest block that can satisfy a request of `size` bytes: the payload
/// rounded up to the alignment plus a double word of boundary tags, floored
/// at the minimum block size so the block can still hold its links once it
/// is freed again. `None` when the tags and rounding don't fit in a `usize`
/// anymore; no block that large can exist, so the caller reports it as the
/// arena refusing to grow.
#[inline]
fn admissible_size(size: usize) -> Option<usize> {
    if size <= DWORD {
        Some(MIN_BLOCK_SIZE)
    } else {
        // round_dword(size + DWORD), with the padding and the rounding slack
        // folded into one checked add.
        size.checked_add(DWORD + DWORD - 1)
            .map(|padded| padded & !(DWORD - 1))
    }
}
