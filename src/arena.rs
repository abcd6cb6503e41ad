use std::ptr::NonNull;

use crate::{align::WORD, OutOfMemory};

/// Virtual memory page size. 4096 bytes on most computers. This should be a
/// constant but we don't know the value at compile time.
#[cfg(not(miri))]
static mut PAGE_SIZE: usize = 0;

/// We only know the value of the page size at runtime by calling
/// [`libc::sysconf`], so we'll call that function once and then mutate a
/// global variable to reuse it.
#[cfg(not(miri))]
#[inline]
unsafe fn page_size() -> usize {
    if PAGE_SIZE == 0 {
        PAGE_SIZE = libc::sysconf(libc::_SC_PAGE_SIZE) as usize;
    }

    PAGE_SIZE
}

#[cfg(miri)]
unsafe fn page_size() -> usize {
    4096
}

/// The single contiguous byte range under management and the only system
/// dependency of the allocator. The full reservation is mapped once up
/// front, but only the bytes below the break have been handed to the heap:
///
/// ```text
/// +-------------------------------+--------------------------------+
/// |      managed by the heap      |      untouched reservation     |
/// +-------------------------------+--------------------------------+
/// ^                               ^                                ^
/// base                          break                       base + capacity
/// ```
///
/// [`Arena::extend`] moves the break forward and never relocates existing
/// bytes, so raw pointers into the managed range stay valid for the lifetime
/// of the arena. The break never moves backwards during normal operation,
/// memory is not returned until the arena itself is dropped.
pub struct Arena {
    /// First address of the reservation.
    base: NonNull<u8>,
    /// Offset of the break, in bytes from `base`.
    brk: usize,
    /// Total reservation length. Growth past this fails.
    capacity: usize,
}

impl Arena {
    /// Reserves `limit` bytes (rounded up to the page size) of read-write
    /// private anonymous memory. Fails if the kernel refuses the mapping.
    pub fn new(limit: usize) -> Result<Self, OutOfMemory> {
        unsafe {
            let capacity = page_size() * limit.div_ceil(page_size());

            let Some(base) = mmap(capacity) else {
                return Err(OutOfMemory);
            };

            Ok(Self {
                base,
                brk: 0,
                capacity,
            })
        }
    }

    /// Grows the managed range by exactly `size` bytes and returns a pointer
    /// to the start of the new region, or [`OutOfMemory`] if the reservation
    /// is exhausted. The range is not grown partially on failure.
    ///
    /// # Panics
    ///
    /// `size` must be a multiple of the word size, the heap never requests
    /// anything else.
    pub fn extend(&mut self, size: usize) -> Result<NonNull<u8>, OutOfMemory> {
        assert_eq!(size % WORD, 0, "arena growth must be word aligned");

        // Checked so that a size near `usize::MAX` cannot wrap the break
        // past the capacity test.
        match self.brk.checked_add(size) {
            Some(end) if end <= self.capacity => {}
            _ => return Err(OutOfMemory),
        }

        let old_brk = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.brk)) };
        self.brk += size;

        Ok(old_brk)
    }

    /// Discards all arena state by rewinding the break. Only meant for
    /// initialization and tests, the heap never calls this.
    pub fn reset(&mut self) {
        self.brk = 0;
    }

    /// Number of bytes currently under management.
    pub fn len(&self) -> usize {
        self.brk
    }

    /// Whether nothing has been handed out yet.
    pub fn is_empty(&self) -> bool {
        self.brk == 0
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe { munmap(self.base.as_ptr(), self.capacity) }
    }
}

/// Calls `mmap` and returns the resulting address or `None` if `mmap` fails.
///
/// # Arguments
///
/// * `length` - Length that we should call `mmap` with. This should be a
/// multiple of the page size.
#[cfg(not(miri))]
unsafe fn mmap(length: usize) -> crate::Pointer<u8> {
    // C void null pointer. This is what we need to request memory with mmap.
    let null = std::ptr::null_mut::<libc::c_void>();
    // Memory protection. Read-Write only.
    let protection = libc::PROT_READ | libc::PROT_WRITE;
    // Memory flags. Should be private to our process and not mapped to any
    // file or device (MAP_ANONYMOUS).
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

    match libc::mmap(null, length, protection, flags, -1, 0) {
        libc::MAP_FAILED => None,
        address => Some(NonNull::new_unchecked(address as *mut u8)),
    }
}

/// Calls [`libc::munmap`] on `address` with `length`. `address` must be
/// valid.
#[cfg(not(miri))]
unsafe fn munmap(address: *mut u8, length: usize) {
    libc::munmap(address as *mut libc::c_void, length);
}

#[cfg(miri)]
unsafe fn mmap(length: usize) -> crate::Pointer<u8> {
    let layout = std::alloc::Layout::from_size_align(length, crate::align::DWORD).unwrap();
    NonNull::new(std::alloc::alloc(layout))
}

#[cfg(miri)]
unsafe fn munmap(address: *mut u8, length: usize) {
    let layout = std::alloc::Layout::from_size_align(length, crate::align::DWORD).unwrap();
    std::alloc::dealloc(address, layout);
}
