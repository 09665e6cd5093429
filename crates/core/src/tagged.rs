//! Tagged word layout
//!
//! Every Garnet value is a single 64-bit word:
//!
//! ```text
//! ┌───────────────────────────────────────────────┬───┐
//! │ fixnum payload (63 bits, arithmetic shift)    │ 1 │  immediate integer
//! ├───────────────────────────────────────────────┴───┤
//! │ cell pointer (low bit 0 by alignment)             │  heap object
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! The low bit doubles as the tag: heap cells are at least 8-byte aligned,
//! so a real pointer never has it set. Fixnum arithmetic therefore never
//! allocates, and the all-zero word is reserved as the null handle.

/// Largest immediate integer: 2^62 - 1. One past it boxes.
pub const FIXNUM_MAX: i64 = (1 << 62) - 1;

/// Smallest immediate integer: -2^62.
pub const FIXNUM_MIN: i64 = -(1 << 62);

/// A 64-bit tagged word: an immediate fixnum (LSB = 1) or a cell pointer.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tagged(u64);

// The whole point of the encoding is that a word is pointer-sized.
const _: () = assert!(size_of::<Tagged>() == 8);
const _: () = assert!(size_of::<Tagged>() == size_of::<usize>());

impl Tagged {
    /// The null handle. Never a valid value in live storage; used for
    /// not-yet-patched class pointers during bootstrap and for "no value"
    /// slots inside payloads.
    pub const NULL: Tagged = Tagged(0);

    /// True if `n` is representable as an immediate.
    #[inline]
    pub const fn fits_fixnum(n: i64) -> bool {
        n >= FIXNUM_MIN && n <= FIXNUM_MAX
    }

    /// Encode an immediate integer. The caller must have checked
    /// [`fits_fixnum`](Self::fits_fixnum); out-of-range values are a
    /// programmer error.
    #[inline]
    pub fn fixnum(n: i64) -> Tagged {
        debug_assert!(Self::fits_fixnum(n));
        Tagged(((n as u64) << 1) | 1)
    }

    /// Encode a cell pointer. The pointer must be at least 2-byte aligned
    /// so the tag bit is free; cells are 8-byte aligned in practice.
    #[inline]
    pub fn pointer<T>(ptr: *const T) -> Tagged {
        let word = ptr as u64;
        debug_assert!(word & 1 == 0, "unaligned cell pointer");
        Tagged(word)
    }

    #[inline]
    pub const fn is_fixnum(self) -> bool {
        self.0 & 1 == 1
    }

    #[inline]
    pub const fn is_pointer(self) -> bool {
        !self.is_fixnum()
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Decode the immediate integer (arithmetic shift restores the sign).
    /// Undefined on pointers; check [`is_fixnum`](Self::is_fixnum) first.
    #[inline]
    pub fn to_fixnum(self) -> i64 {
        debug_assert!(self.is_fixnum());
        (self.0 as i64) >> 1
    }

    /// Decode the pointer half. Panics on fixnums: asking a tagged integer
    /// for its pointer is a bug in the caller, not a recoverable state.
    #[inline]
    pub fn to_pointer<T>(self) -> *mut T {
        assert!(self.is_pointer(), "to_pointer called on a fixnum word");
        self.0 as *mut T
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Tagged {
        Tagged(raw)
    }
}

impl std::fmt::Debug for Tagged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_fixnum() {
            write!(f, "Fixnum({})", self.to_fixnum())
        } else if self.is_null() {
            write!(f, "Null")
        } else {
            write!(f, "Cell({:#x})", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixnum_round_trip() {
        for n in [0, 1, -1, 42, -42, 1 << 40, -(1 << 40), FIXNUM_MAX, FIXNUM_MIN] {
            let t = Tagged::fixnum(n);
            assert!(t.is_fixnum());
            assert!(!t.is_pointer());
            assert_eq!(t.to_fixnum(), n);
        }
    }

    #[test]
    fn fixnum_range() {
        assert!(Tagged::fits_fixnum(FIXNUM_MAX));
        assert!(Tagged::fits_fixnum(FIXNUM_MIN));
        assert!(!Tagged::fits_fixnum(FIXNUM_MAX + 1));
        assert!(!Tagged::fits_fixnum(FIXNUM_MIN - 1));
    }

    #[test]
    fn pointer_round_trip() {
        let boxed = Box::new(7u64);
        let ptr = Box::into_raw(boxed);
        let t = Tagged::pointer(ptr);
        assert!(t.is_pointer());
        assert!(!t.is_fixnum());
        assert_eq!(t.to_pointer::<u64>(), ptr);
        drop(unsafe { Box::from_raw(ptr) });
    }

    #[test]
    fn null_is_a_pointer_word() {
        assert!(Tagged::NULL.is_null());
        assert!(Tagged::NULL.is_pointer());
        assert!(!Tagged::fixnum(0).is_null());
    }

    #[test]
    #[should_panic]
    fn to_pointer_on_fixnum_panics() {
        let _ = Tagged::fixnum(1).to_pointer::<u8>();
    }
}
