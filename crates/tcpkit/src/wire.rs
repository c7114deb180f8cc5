//! Fixed-size binary struct codec.
//!
//! Values are encoded field by field in the caller's [`ByteOrder`], with no
//! padding and no length prefix, so both ends have to agree on the exact
//! layout out of band. Implement [`Wire`] for your own types with the
//! [`wire_struct!`](crate::wire_struct) macro.

use bytes::{Buf, BufMut};

/// Byte order used when encoding multi-byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

/// A type with a fixed encoded size.
pub trait Wire: Sized {
    /// Exact number of bytes produced by [`Wire::put`].
    const SIZE: usize;

    /// Append the encoded value to `buf`.
    fn put<B: BufMut>(&self, buf: &mut B, order: ByteOrder);

    /// Decode a value from `buf`, which must hold at least [`Wire::SIZE`] bytes.
    fn get<B: Buf>(buf: &mut B, order: ByteOrder) -> Self;
}

/// Encode `value` into a freshly allocated buffer of exactly `T::SIZE` bytes.
pub fn encode<T: Wire>(value: &T, order: ByteOrder) -> Vec<u8> {
    let mut buf = Vec::with_capacity(T::SIZE);
    value.put(&mut buf, order);
    debug_assert_eq!(buf.len(), T::SIZE);
    buf
}

/// Decode a value from exactly `T::SIZE` bytes, or `None` if `data` is short.
pub fn decode<T: Wire>(mut data: &[u8], order: ByteOrder) -> Option<T> {
    if data.len() < T::SIZE {
        return None;
    }
    Some(T::get(&mut data, order))
}

macro_rules! impl_wire_number {
    ($($ty:ty => $put_be:ident, $put_le:ident, $get_be:ident, $get_le:ident;)+) => {
        $(
            impl Wire for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn put<B: BufMut>(&self, buf: &mut B, order: ByteOrder) {
                    match order {
                        ByteOrder::BigEndian => buf.$put_be(*self),
                        ByteOrder::LittleEndian => buf.$put_le(*self),
                    }
                }

                fn get<B: Buf>(buf: &mut B, order: ByteOrder) -> Self {
                    match order {
                        ByteOrder::BigEndian => buf.$get_be(),
                        ByteOrder::LittleEndian => buf.$get_le(),
                    }
                }
            }
        )+
    };
}

impl_wire_number! {
    u16 => put_u16, put_u16_le, get_u16, get_u16_le;
    i16 => put_i16, put_i16_le, get_i16, get_i16_le;
    u32 => put_u32, put_u32_le, get_u32, get_u32_le;
    i32 => put_i32, put_i32_le, get_i32, get_i32_le;
    u64 => put_u64, put_u64_le, get_u64, get_u64_le;
    i64 => put_i64, put_i64_le, get_i64, get_i64_le;
    f32 => put_f32, put_f32_le, get_f32, get_f32_le;
    f64 => put_f64, put_f64_le, get_f64, get_f64_le;
}

impl Wire for u8 {
    const SIZE: usize = 1;

    fn put<B: BufMut>(&self, buf: &mut B, _order: ByteOrder) {
        buf.put_u8(*self);
    }

    fn get<B: Buf>(buf: &mut B, _order: ByteOrder) -> Self {
        buf.get_u8()
    }
}

impl Wire for i8 {
    const SIZE: usize = 1;

    fn put<B: BufMut>(&self, buf: &mut B, _order: ByteOrder) {
        buf.put_i8(*self);
    }

    fn get<B: Buf>(buf: &mut B, _order: ByteOrder) -> Self {
        buf.get_i8()
    }
}

impl Wire for bool {
    const SIZE: usize = 1;

    fn put<B: BufMut>(&self, buf: &mut B, _order: ByteOrder) {
        buf.put_u8(u8::from(*self));
    }

    fn get<B: Buf>(buf: &mut B, _order: ByteOrder) -> Self {
        buf.get_u8() != 0
    }
}

impl Wire for () {
    const SIZE: usize = 0;

    fn put<B: BufMut>(&self, _buf: &mut B, _order: ByteOrder) {}

    fn get<B: Buf>(_buf: &mut B, _order: ByteOrder) -> Self {}
}

impl<T: Wire, const N: usize> Wire for [T; N] {
    const SIZE: usize = T::SIZE * N;

    fn put<B: BufMut>(&self, buf: &mut B, order: ByteOrder) {
        for item in self {
            item.put(buf, order);
        }
    }

    fn get<B: Buf>(buf: &mut B, order: ByteOrder) -> Self {
        // from_fn visits indices in ascending order
        std::array::from_fn(|_| T::get(buf, order))
    }
}

/// Declare a struct and implement [`Wire`] for it, encoding fields in
/// declaration order.
///
/// ```
/// tcpkit::wire_struct! {
///     #[derive(Debug, PartialEq)]
///     pub struct Reading {
///         pub sensor: u16,
///         pub value: f32,
///         pub tag: [u8; 4],
///     }
/// }
///
/// use tcpkit::wire::{ByteOrder, Wire};
/// assert_eq!(Reading::SIZE, 10);
/// let bytes = tcpkit::wire::encode(&Reading { sensor: 1, value: 0.5, tag: *b"abcd" }, ByteOrder::BigEndian);
/// assert_eq!(&bytes[..2], &[0, 1]);
/// ```
#[macro_export]
macro_rules! wire_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($(#[$field_meta:meta])* $field_vis:vis $field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $($(#[$field_meta])* $field_vis $field: $ty),*
        }

        impl $crate::wire::Wire for $name {
            const SIZE: usize = 0 $(+ <$ty as $crate::wire::Wire>::SIZE)*;

            #[allow(unused_variables)]
            fn put<B: $crate::bytes::BufMut>(&self, buf: &mut B, order: $crate::wire::ByteOrder) {
                $(<$ty as $crate::wire::Wire>::put(&self.$field, buf, order);)*
            }

            #[allow(unused_variables)]
            fn get<B: $crate::bytes::Buf>(buf: &mut B, order: $crate::wire::ByteOrder) -> Self {
                Self {
                    $($field: <$ty as $crate::wire::Wire>::get(buf, order)),*
                }
            }
        }
    };
}
