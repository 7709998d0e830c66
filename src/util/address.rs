use bytemuck::NoUninit;

use std::fmt;
use std::ops::*;

use crate::util::constants::{BYTES_IN_WORD, LOG_BYTES_IN_WORD};

/// A byte address in the heap, in collector metadata or anywhere else in the address space.
///
/// Arithmetic on addresses is safe; reading or writing through one is not.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct Address(usize);

impl Add<usize> for Address {
    type Output = Address;
    fn add(self, bytes: usize) -> Address {
        Address(self.0 + bytes)
    }
}

impl AddAssign<usize> for Address {
    fn add_assign(&mut self, bytes: usize) {
        self.0 += bytes;
    }
}

impl Sub<usize> for Address {
    type Output = Address;
    fn sub(self, bytes: usize) -> Address {
        Address(self.0 - bytes)
    }
}

impl SubAssign<usize> for Address {
    fn sub_assign(&mut self, bytes: usize) {
        self.0 -= bytes;
    }
}

/// The distance in bytes from `other` up to `self`.
impl Sub<Address> for Address {
    type Output = usize;
    fn sub(self, other: Address) -> usize {
        debug_assert!(
            self.0 >= other.0,
            "for (addr_a - addr_b), a({}) needs to be larger than b({})",
            self,
            other
        );
        self.0 - other.0
    }
}

/// Card and region indices are address bits above some shift.
impl Shr<usize> for Address {
    type Output = usize;
    fn shr(self, shift: usize) -> usize {
        self.0 >> shift
    }
}

impl Address {
    pub const ZERO: Self = Address(0);

    /// # Safety
    /// The caller must make sure the result is a sensible address for how it is used.
    pub const unsafe fn from_usize(raw: usize) -> Address {
        Address(raw)
    }

    pub fn from_ref<T>(r: &T) -> Address {
        Address(r as *const T as usize)
    }

    pub fn from_mut_ptr<T>(ptr: *mut T) -> Address {
        Address(ptr as usize)
    }

    pub const fn add_words(self, words: usize) -> Address {
        Address(self.0 + (words << LOG_BYTES_IN_WORD))
    }

    /// The number of words from `other` up to `self`.
    pub const fn words_from(self, other: Address) -> usize {
        debug_assert!(self.0 >= other.0);
        (self.0 - other.0) >> LOG_BYTES_IN_WORD
    }

    pub const fn align_up(self, align: usize) -> Address {
        debug_assert!(align.is_power_of_two());
        Address((self.0 + align - 1) & !(align - 1))
    }

    pub const fn align_down(self, align: usize) -> Address {
        debug_assert!(align.is_power_of_two());
        Address(self.0 & !(align - 1))
    }

    pub const fn is_aligned_to(self, align: usize) -> bool {
        self.0 & (align - 1) == 0
    }

    pub const fn is_word_aligned(self) -> bool {
        self.is_aligned_to(BYTES_IN_WORD)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// # Safety
    /// The address must be valid for reads of a `T`.
    pub unsafe fn load<T: Copy>(self) -> T {
        *(self.0 as *const T)
    }

    /// # Safety
    /// The address must be valid for writes of a `T`.
    pub unsafe fn store<T>(self, value: T) {
        // The old value is not a live `T`, so it must not be dropped.
        std::ptr::write(self.0 as *mut T, value);
    }

    pub fn to_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub fn to_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// # Safety
    /// The address must point to a `T` that lives for `'a`, shared or interior-mutable only.
    pub unsafe fn as_ref<'a, T>(self) -> &'a T {
        &*self.to_ptr::<T>()
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A reference to an object in the heap: the address of the object's first word. Zero is
/// the null reference, which slots may hold but which never denotes an object.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct ObjectReference(usize);

impl ObjectReference {
    pub const NULL: ObjectReference = ObjectReference(0);

    pub fn to_raw_address(self) -> Address {
        Address(self.0)
    }

    pub fn from_raw_address(addr: Address) -> ObjectReference {
        ObjectReference(addr.0)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn value(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(raw: usize) -> Address {
        unsafe { Address::from_usize(raw) }
    }

    #[test]
    fn card_index_of_address() {
        assert_eq!(addr(0x1234) >> 9, 9);
        assert_eq!((addr(0x2000) - addr(0x1000)) >> 9, 8);
    }

    #[test]
    fn word_distance() {
        let base = addr(0x8000);
        assert_eq!(base.add_words(3).words_from(base), 3);
        assert!(base.add_words(1).is_word_aligned());
        assert!(!(base + 4).is_word_aligned());
    }

    #[test]
    fn null_reference() {
        assert!(ObjectReference::NULL.is_null());
        assert!(ObjectReference::from_raw_address(Address::ZERO).is_null());
        let object = ObjectReference::from_raw_address(addr(0x40));
        assert_eq!(format!("{}", object), "0x40");
    }
}
