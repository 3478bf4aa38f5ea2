//! Integer conversions at the host / engine boundary.

/// Widening casts that cannot lose information on supported platforms
pub trait SafeCast<T> {
    fn safe_cast(self) -> T;
}

#[cfg(not(target_pointer_width = "16"))]
impl SafeCast<usize> for u32 {
    fn safe_cast(self) -> usize {
        self as usize
    }
}

impl SafeCast<i64> for i32 {
    fn safe_cast(self) -> i64 {
        self.into()
    }
}


/// For narrowing casts where business logic ensures that the value is in the narrower type's range.
/// NB: The implementations will panic otherwise
pub trait PrecheckedCast<T> {
    fn prechecked_cast(self) -> T;
}
impl PrecheckedCast<i32> for usize {
    fn prechecked_cast(self) -> i32 {
        self.try_into().expect("this is a bug: application logic should have ensured the value range")
    }
}


/// Reinterpreting casts: the host passes signed integers, the engine counts with wrapping
///  unsigned 32 bit values.
pub trait WrappingCast<T> {
    fn wrapping_cast(self) -> T;
}
impl WrappingCast<u32> for i64 {
    fn wrapping_cast(self) -> u32 {
        self as u32
    }
}
impl WrappingCast<i64> for u32 {
    fn wrapping_cast(self) -> i64 {
        // as the engine's signed 32 bit view, like the classic C interface
        (self as i32).into()
    }
}
