//! Byte order and the primitive element types accessible through views.

use std::fmt::Debug;

/// Byte order of multi-byte primitives stored in a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// Byte order of the target platform.
    #[inline]
    pub const fn native() -> ByteOrder {
        if cfg!(target_endian = "little") {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }

    /// Byte order opposite to the native one.
    #[inline]
    pub const fn non_native() -> ByteOrder {
        ByteOrder::native().opposite()
    }

    #[inline]
    pub const fn opposite(self) -> ByteOrder {
        match self {
            ByteOrder::LittleEndian => ByteOrder::BigEndian,
            ByteOrder::BigEndian => ByteOrder::LittleEndian,
        }
    }

    #[inline]
    pub fn is_native(self) -> bool {
        self == ByteOrder::native()
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::native()
    }
}

impl std::fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ByteOrder::LittleEndian => f.write_str("LITTLE_ENDIAN"),
            ByteOrder::BigEndian => f.write_str("BIG_ENDIAN"),
        }
    }
}

/// Fixed-size numeric value that can be read from and written to a view.
///
/// Every bit pattern of `Self` is a valid value, so reads from arbitrary memory are sound.
pub trait Primitive: bytemuck::Pod + PartialEq + Debug + Send + Sync + 'static {
    /// Size of the value in bytes.
    const SIZE: usize = std::mem::size_of::<Self>();

    /// Reverses the byte order of the value.
    fn swap(self) -> Self;

    /// Converts from the given byte order to native order.
    #[inline]
    fn from_order(self, swap_required: bool) -> Self {
        if swap_required { self.swap() } else { self }
    }
}

macro_rules! impl_int_primitive {
    ($($t:ty),*) => {
        $(
            impl Primitive for $t {
                #[inline]
                fn swap(self) -> Self {
                    self.swap_bytes()
                }
            }
        )*
    };
}

macro_rules! impl_float_primitive {
    ($($t:ty),*) => {
        $(
            impl Primitive for $t {
                #[inline]
                fn swap(self) -> Self {
                    <$t>::from_bits(self.to_bits().swap_bytes())
                }
            }
        )*
    };
}

impl_int_primitive!(u8, i8, u16, i16, u32, i32, u64, i64);
impl_float_primitive!(f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_order() {
        assert!(ByteOrder::native().is_native());
        assert!(!ByteOrder::non_native().is_native());
        assert_eq!(ByteOrder::native().opposite(), ByteOrder::non_native());
        assert_eq!(ByteOrder::default(), ByteOrder::native());
    }

    #[test]
    fn test_swap() {
        assert_eq!(0x1234u16.swap(), 0x3412);
        assert_eq!(0x0102_0304i32.swap(), 0x0403_0201);
        assert_eq!(7u8.swap(), 7);
        let f = 1.5f64;
        assert_eq!(f.swap().swap(), f);
        assert_eq!(f.swap().to_bits(), f.to_bits().swap_bytes());
        assert_eq!(0x0102u16.from_order(false), 0x0102);
        assert_eq!(0x0102u16.from_order(true), 0x0201);
    }
}
