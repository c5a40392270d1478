//! Self-relative handles.
//!
//! A `RelHandle<T>` stores `target_address - own_address`. Because nothing
//! absolute is recorded, an arena image can be copied to any base address and
//! every handle inside it still resolves. A zero offset is null (an object can
//! never point at its own handle field).

use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::arena::Arena;
use crate::error::{Result, SolverError};

/// Offset-based reference to a `T` in the same arena.
///
/// Handles are only ever constructed null and then set in place inside
/// arena-resident objects. Copying a non-null handle elsewhere would break
/// it, so the type is deliberately neither `Clone` nor `Copy`.
#[repr(transparent)]
pub struct RelHandle<T> {
    offset: AtomicI64,
    _target: PhantomData<fn() -> T>,
}

impl<T> RelHandle<T> {
    pub(crate) const fn null() -> Self {
        Self {
            offset: AtomicI64::new(0),
            _target: PhantomData,
        }
    }

    #[inline]
    fn own_address(&self) -> isize {
        self as *const Self as isize
    }

    /// Raw offset (0 = null).
    #[inline]
    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.offset() == 0
    }

    /// Point this handle at `target`, or clear it.
    ///
    /// `self` and `target` must live in the same arena region.
    pub(crate) fn set(&self, target: Option<&T>) {
        let offset = match target {
            Some(t) => (t as *const T as isize - self.own_address()) as i64,
            None => 0,
        };
        self.offset.store(offset, Ordering::Release);
    }

    /// Resolve relative to where this handle currently lives.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        let offset = self.offset();
        if offset == 0 {
            return None;
        }
        let address = self.own_address() + offset as isize;
        // SAFETY: a non-null handle was set to a live arena object in the
        // same region; the region is never freed or compacted while borrowed.
        Some(unsafe { &*(address as *const T) })
    }

    /// Like `get`, but a null handle is a fatal logic error.
    #[inline]
    pub fn resolve(&self) -> Result<&T> {
        self.get().ok_or(SolverError::NullHandle)
    }

    /// View `len` consecutive `T`s starting at the target.
    ///
    /// # Safety
    /// The handle must have been set to the first element of an arena array
    /// holding at least `len` initialized elements.
    pub(crate) unsafe fn slice(&self, len: usize) -> Option<&[T]> {
        let first = self.get()?;
        Some(std::slice::from_raw_parts(first as *const T, len))
    }
}

impl<T> RelHandle<T> {
    /// Byte offset targeted by the handle stored at byte `at` of `arena`,
    /// checked to hold `len` aligned `T`s inside the occupied range.
    ///
    /// Only the raw offset is read, so this is safe on untrusted images.
    /// `Ok(None)` is a null handle.
    pub(crate) fn target_in(
        arena: &Arena,
        at: usize,
        len: usize,
    ) -> std::result::Result<Option<usize>, String> {
        let offset: i64 = arena
            .read_at(at)
            .ok_or_else(|| format!("handle at byte {at} lies outside the image"))?;
        if offset == 0 {
            return Ok(None);
        }
        let target = i64::try_from(at)
            .ok()
            .and_then(|at| at.checked_add(offset))
            .and_then(|t| usize::try_from(t).ok())
            .ok_or_else(|| format!("handle at byte {at} points before the image ({offset:+})"))?;
        if !arena.holds::<T>(target, len.max(1)) {
            return Err(format!(
                "handle at byte {at} points at {target}, misaligned or past the end of the image"
            ));
        }
        Ok(Some(target))
    }
}

impl<T> Default for RelHandle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> std::fmt::Debug for RelHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RelHandle({:+})", self.offset())
    }
}
