//! Bump arena backing the whole search graph.
//!
//! One anonymous mapping holds every node, edge array, bitmap and the table
//! header. Allocation only moves an atomic offset forward; nothing is ever
//! freed, reused or moved, so references handed out stay valid for the
//! arena's lifetime. Checkpointing copies `[0, used)` verbatim and restoring
//! copies it back into a fresh mapping at whatever address the OS picks.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use memmap2::MmapMut;

use crate::error::{Result, SolverError};

/// Types that may be placed in the arena.
///
/// # Safety
/// Implementors must be plain data: the all-zero bit pattern is a valid
/// value, dropping is a no-op, and no field stores an absolute address.
/// Locks inside implementors are rebuilt after a restore, never trusted.
pub unsafe trait Persistable: Sized {}

unsafe impl Persistable for u8 {}
unsafe impl Persistable for u32 {}
unsafe impl Persistable for u64 {}
unsafe impl<T> Persistable for crate::handle::RelHandle<T> {}

/// Fixed-capacity bump allocator over an anonymous memory mapping.
pub struct Arena {
    /// Keeps the mapping alive; all access goes through `base`
    _region: MmapMut,
    base: NonNull<u8>,
    capacity: usize,
    top: AtomicUsize,
}

// SAFETY: every allocation hands out a disjoint byte range (the offset is
// advanced atomically) and the mapping outlives all references into it.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Reserve `capacity` zeroed bytes.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut region = MmapMut::map_anon(capacity).map_err(|source| {
            SolverError::ReservationFailed {
                bytes: capacity,
                source,
            }
        })?;
        let base = NonNull::new(region.as_mut_ptr()).ok_or_else(|| {
            SolverError::ReservationFailed {
                bytes: capacity,
                source: std::io::Error::new(std::io::ErrorKind::Other, "null mapping"),
            }
        })?;
        Ok(Self {
            _region: region,
            base,
            capacity,
            top: AtomicUsize::new(0),
        })
    }

    /// Reserve `capacity` bytes and copy a checkpointed image into the front.
    pub fn from_image(capacity: usize, image: &[u8]) -> Result<Self> {
        if image.len() > capacity {
            return Err(SolverError::OutOfMemory {
                requested: image.len(),
                available: capacity,
            });
        }
        let arena = Self::with_capacity(capacity)?;
        // SAFETY: the fresh mapping is at least `image.len()` bytes and no
        // reference into it exists yet.
        unsafe {
            std::ptr::copy_nonoverlapping(image.as_ptr(), arena.base.as_ptr(), image.len());
        }
        arena.top.store(image.len(), Ordering::Release);
        Ok(arena)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.top.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.capacity - self.used()
    }

    /// Base address of the mapping (differs between runs).
    pub fn base_address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Whether `ptr` points into the occupied range.
    pub fn contains<T>(&self, ptr: *const T) -> bool {
        let addr = ptr as usize;
        addr >= self.base_address() && addr < self.base_address() + self.used()
    }

    /// The occupied byte range. Exclusive access guarantees no allocation or
    /// locked mutation is in flight while the bytes are read.
    pub fn occupied(&mut self) -> &[u8] {
        let used = self.used();
        // SAFETY: `[0, used)` was written by completed allocations; `&mut self`
        // rules out concurrent writers.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), used) }
    }

    fn allocate_raw(&self, layout: Layout) -> Result<NonNull<u8>> {
        debug_assert!(layout.align() <= 4096, "alignment beyond page size");
        let size = layout.size();
        let align = layout.align();
        let mut start = 0usize;
        self.top
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |top| {
                let aligned = top.checked_add(align - 1)? & !(align - 1);
                let end = aligned.checked_add(size)?;
                if end > self.capacity {
                    return None;
                }
                start = aligned;
                Some(end)
            })
            .map_err(|top| SolverError::OutOfMemory {
                requested: size,
                available: self.capacity.saturating_sub(top),
            })?;
        // SAFETY: `start + size <= capacity`, inside the mapping.
        Ok(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(start)) })
    }

    /// Move `value` into the arena.
    pub fn allocate<T: Persistable>(&self, value: T) -> Result<&T> {
        debug_assert!(!std::mem::needs_drop::<T>());
        let ptr = self.allocate_raw(Layout::new::<T>())?.cast::<T>();
        // SAFETY: freshly reserved, aligned, exclusively ours.
        unsafe {
            ptr.as_ptr().write(value);
            Ok(&*ptr.as_ptr())
        }
    }

    /// A zero-initialized array of `len` elements.
    pub fn allocate_slice<T: Persistable>(&self, len: usize) -> Result<&[T]> {
        if len == 0 {
            return Ok(&[]);
        }
        let layout = Layout::array::<T>(len).map_err(|_| SolverError::OutOfMemory {
            requested: usize::MAX,
            available: self.available(),
        })?;
        let ptr = self.allocate_raw(layout)?.cast::<T>();
        // SAFETY: the mapping is zero-filled and bytes are never reused, so the
        // range is all zeroes, which `Persistable` declares valid.
        Ok(unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) })
    }

    /// Copy `src` into the arena.
    pub fn allocate_copy<T: Persistable + Copy>(&self, src: &[T]) -> Result<&[T]> {
        self.allocate_iter(src.iter().copied())
    }

    /// Fill a new array from an exact-size iterator.
    pub fn allocate_iter<T, I>(&self, items: I) -> Result<&[T]>
    where
        T: Persistable,
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        let items = items.into_iter();
        let len = items.len();
        if len == 0 {
            return Ok(&[]);
        }
        let layout = Layout::array::<T>(len).map_err(|_| SolverError::OutOfMemory {
            requested: usize::MAX,
            available: self.available(),
        })?;
        let ptr = self.allocate_raw(layout)?.cast::<T>();
        let mut written = 0;
        for item in items.take(len) {
            // SAFETY: `written < len`, inside the reserved range.
            unsafe { ptr.as_ptr().add(written).write(item) };
            written += 1;
        }
        debug_assert_eq!(written, len);
        // SAFETY: any slot the iterator failed to fill is still zeroed.
        Ok(unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) })
    }

    /// Bounds-checked copy of the bytes at `offset`, any alignment.
    pub(crate) fn read_at<T: Copy>(&self, offset: usize) -> Option<T> {
        let end = offset.checked_add(std::mem::size_of::<T>())?;
        if end > self.used() {
            return None;
        }
        // SAFETY: `[offset, end)` is inside the occupied range.
        Some(unsafe { std::ptr::read_unaligned(self.base.as_ptr().add(offset) as *const T) })
    }

    /// Whether `len` consecutive `T`s starting at `offset` are aligned and
    /// inside the occupied range.
    pub(crate) fn holds<T>(&self, offset: usize, len: usize) -> bool {
        offset % std::mem::align_of::<T>() == 0
            && std::mem::size_of::<T>()
                .checked_mul(len)
                .and_then(|bytes| bytes.checked_add(offset))
                .is_some_and(|end| end <= self.used())
    }

    /// Reference to a `T` at a fixed byte offset.
    ///
    /// # Safety
    /// A `T` must have been allocated at exactly `offset`.
    pub(crate) unsafe fn get_at<T>(&self, offset: usize) -> &T {
        debug_assert!(offset + std::mem::size_of::<T>() <= self.used());
        &*(self.base.as_ptr().add(offset) as *const T)
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("base", &self.base)
            .field("capacity", &self.capacity)
            .field("used", &self.used())
            .finish()
    }
}
