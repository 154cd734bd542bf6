//! Variable-length integer encoding and decoding.
//!
//! Values are split into 7-bit groups, least-significant group first. Every byte except the
//! last has its continuation bit (0x80) set. Signed integers are ZigZag-mapped first so that
//! values close to zero stay short regardless of sign.

use std::ops::{BitOrAssign, Shl, ShrAssign};

use bytes::{Buf, BufMut};

use crate::{Error, Result};

const BITS_PER_BYTE: usize = 8;
const DATA_BITS_PER_BYTE: usize = 7;
const DATA_BITS_MASK: u8 = 0x7F;
const CONTINUATION_BIT_MASK: u8 = 0x80;

/// The longest encoding of any supported width (`u64`).
pub const MAX_VARINT_LEN: usize = 10;

/// Unsigned integers that can be varint encoded.
pub trait UInt:
    Copy
    + From<u8>
    + Sized
    + ShrAssign<usize>
    + Shl<usize, Output = Self>
    + BitOrAssign<Self>
    + PartialOrd
{
    fn leading_zeros(self) -> u32;

    /// The least significant byte.
    fn as_u8(self) -> u8;
}

macro_rules! impl_uint {
    ($type:ty) => {
        impl UInt for $type {
            #[inline]
            fn leading_zeros(self) -> u32 {
                self.leading_zeros()
            }

            #[inline]
            fn as_u8(self) -> u8 {
                self as u8
            }
        }
    };
}
impl_uint!(u8);
impl_uint!(u16);
impl_uint!(u32);
impl_uint!(u64);

/// Signed integers with a ZigZag mapping onto the unsigned type of the same width.
///
/// `(v << 1) ^ (v >> (width - 1))` moves the sign into the least significant bit.
pub trait SInt<U: UInt> {
    fn as_zigzag(&self) -> U;

    fn un_zigzag(value: U) -> Self;
}

macro_rules! impl_sint {
    ($type:ty, $utype:ty) => {
        impl SInt<$utype> for $type {
            #[inline]
            fn as_zigzag(&self) -> $utype {
                let shr = std::mem::size_of::<$utype>() * 8 - 1;
                ((self << 1) ^ (self >> shr)) as $utype
            }

            #[inline]
            fn un_zigzag(value: $utype) -> Self {
                ((value >> 1) as $type) ^ (-((value & 1) as $type))
            }
        }
    };
}
impl_sint!(i8, u8);
impl_sint!(i16, u16);
impl_sint!(i32, u32);
impl_sint!(i64, u64);

/// Encodes an unsigned integer as a varint.
pub fn write<T: UInt>(value: T, buf: &mut impl BufMut) {
    let continuation_threshold = T::from(CONTINUATION_BIT_MASK);
    if value < continuation_threshold {
        buf.put_u8(value.as_u8());
        return;
    }

    let mut val = value;
    while val >= continuation_threshold {
        buf.put_u8(val.as_u8() | CONTINUATION_BIT_MASK);
        val >>= 7;
    }
    buf.put_u8(val.as_u8());
}

/// Decodes an unsigned integer from a varint.
///
/// # Errors
/// `InsufficientData` if the input ends before a terminating byte, `InvalidVarInt` if the
/// encoded value does not fit in `T`.
pub fn read<T: UInt>(buf: &mut impl Buf) -> Result<T> {
    let max_bits = std::mem::size_of::<T>() * BITS_PER_BYTE;
    let mut result: T = T::from(0);
    let mut shift = 0;

    loop {
        if !buf.has_remaining() {
            return Err(Error::InsufficientData {
                needed: 1,
                remaining: 0,
            });
        }
        let byte = buf.get_u8();

        // On what must be the final byte, any bit beyond the width of T (including the
        // continuation bit) is an overflow.
        let remaining_bits = max_bits.saturating_sub(shift);
        if remaining_bits <= DATA_BITS_PER_BYTE {
            let relevant_bits = BITS_PER_BYTE - byte.leading_zeros() as usize;
            if relevant_bits > remaining_bits {
                return Err(Error::InvalidVarInt);
            }
        }

        result |= T::from(byte & DATA_BITS_MASK) << shift;

        if byte & CONTINUATION_BIT_MASK == 0 {
            return Ok(result);
        }

        shift += DATA_BITS_PER_BYTE;
    }
}

/// Number of bytes needed to encode `value`: `ceil(bits_used / 7)`, minimum 1.
pub fn size<T: UInt>(value: T) -> usize {
    let total_bits = std::mem::size_of::<T>() * BITS_PER_BYTE;
    let data_bits = total_bits - value.leading_zeros() as usize;
    usize::max(1, data_bits.div_ceil(DATA_BITS_PER_BYTE))
}

/// Encodes a signed integer as a ZigZag varint.
pub fn write_signed<U: UInt, S: SInt<U>>(value: S, buf: &mut impl BufMut) {
    write(value.as_zigzag(), buf);
}

/// Decodes a signed integer from a ZigZag varint.
pub fn read_signed<U: UInt, S: SInt<U>>(buf: &mut impl Buf) -> Result<S> {
    Ok(S::un_zigzag(read(buf)?))
}

pub fn size_signed<U: UInt, S: SInt<U>>(value: S) -> usize {
    size(value.as_zigzag())
}

/// Advances past one varint without materializing it.
pub fn skip(buf: &mut impl Buf) -> Result<()> {
    read::<u64>(buf).map(|_| ())
}
