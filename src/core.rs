//! Codecs for the built-in leaf types.
//!
//! Every leaf field is a value field: it consumes a reference id but can never be the target
//! of a reference.

use std::marker::PhantomData;
use std::time::Duration;

use bytes::Bytes;

use crate::buffer::{Reader, Writer};
use crate::codec::{FieldCodec, ObjectValue};
use crate::session::Session;
use crate::tag::{write_field_header, Field, WireType};
use crate::types::Type;
use crate::{Error, Result};

const NANOS_PER_SEC: u128 = 1_000_000_000;

#[inline]
fn write_value_header(
    writer: &mut Writer,
    session: &mut Session,
    field_id_delta: u32,
    expected: &Type,
    actual: &Type,
    wire_type: WireType,
) {
    session.references_mut().mark_value_field();
    write_field_header(writer, session, field_id_delta, expected, Some(actual), wire_type);
}

// --- bool ---
/// `false` and `true` as VarInt 0 and 1. Any non-zero value reads as `true`.
#[derive(Debug, Default)]
pub struct BoolCodec;

impl FieldCodec<bool> for BoolCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &bool,
    ) -> Result<()> {
        write_value_header(
            writer,
            session,
            field_id_delta,
            expected,
            &Type::boolean(),
            WireType::VarInt,
        );
        writer.write_var_u32(*value as u32);
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<bool> {
        session.references_mut().mark_value_field();
        field.expect_wire_type(WireType::VarInt, "bool")?;
        Ok(reader.read_var_u32()? != 0)
    }
}

// --- integers ---
/// Integer types sharing one codec. Values are widened to `i128` on read and narrowed with a
/// range check, so a field can be read at a different width than it was written.
pub trait Integer: ObjectValue + Copy + Into<i128> + TryFrom<i128> {
    const SIGNED: bool;
}

macro_rules! impl_integer {
    ($($ty:ty => $signed:literal),* $(,)?) => {
        $(
            impl Integer for $ty {
                const SIGNED: bool = $signed;
            }
        )*
    };
}

impl_integer! {
    i8 => true,
    i16 => true,
    i32 => true,
    i64 => true,
    u8 => false,
    u16 => false,
    u32 => false,
    u64 => false,
}

/// Signedness of a well-known integer type, used to decode fields written at another width.
fn integer_signedness(ty: &Type) -> Option<bool> {
    match ty.name() {
        "i8" | "i16" | "i32" | "i64" => Some(true),
        "u8" | "u16" | "u32" | "u64" => Some(false),
        _ => None,
    }
}

/// Integers as VarInt (ZigZag for signed types). Also reads `Fixed32` and `Fixed64`.
pub struct IntegerCodec<T>(PhantomData<fn() -> T>);

impl<T> IntegerCodec<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for IntegerCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Integer> FieldCodec<T> for IntegerCodec<T> {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &T,
    ) -> Result<()> {
        write_value_header(
            writer,
            session,
            field_id_delta,
            expected,
            &T::static_type(),
            WireType::VarInt,
        );
        let wide: i128 = (*value).into();
        if T::SIGNED {
            writer.write_var_i64(wide as i64);
        } else {
            writer.write_var_u64(wide as u64);
        }
        Ok(())
    }

    fn read_value(&self, reader: &mut Reader, session: &mut Session, field: &Field) -> Result<T> {
        session.references_mut().mark_value_field();
        let signed = field
            .field_type()?
            .and_then(integer_signedness)
            .unwrap_or(T::SIGNED);
        let wide: i128 = match (field.wire_type(), signed) {
            (WireType::VarInt, true) => reader.read_var_i64()? as i128,
            (WireType::VarInt, false) => reader.read_var_u64()? as i128,
            (WireType::Fixed32, true) => reader.read_u32_le()? as i32 as i128,
            (WireType::Fixed32, false) => reader.read_u32_le()? as i128,
            (WireType::Fixed64, true) => reader.read_u64_le()? as i64 as i128,
            (WireType::Fixed64, false) => reader.read_u64_le()? as i128,
            _ => return Err(field.unsupported("integer")),
        };
        T::try_from(wide).map_err(|_| {
            Error::Decode(format!("Value {} too large for {}", wide, T::static_type()))
        })
    }
}

// --- floats ---
/// `f32` as Fixed32. A Fixed64 field is narrowed if it is within range.
#[derive(Debug, Default)]
pub struct Float32Codec;

impl FieldCodec<f32> for Float32Codec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &f32,
    ) -> Result<()> {
        write_value_header(
            writer,
            session,
            field_id_delta,
            expected,
            &Type::float32(),
            WireType::Fixed32,
        );
        writer.write_f32_le(*value);
        Ok(())
    }

    fn read_value(&self, reader: &mut Reader, session: &mut Session, field: &Field) -> Result<f32> {
        session.references_mut().mark_value_field();
        match field.wire_type() {
            WireType::Fixed32 => reader.read_f32_le(),
            WireType::Fixed64 => {
                let value = reader.read_f64_le()?;
                if value.is_finite() && (value > f32::MAX as f64 || value < f32::MIN as f64) {
                    return Err(Error::Decode(format!("Value {} too large for f32", value)));
                }
                Ok(value as f32)
            }
            _ => Err(field.unsupported("f32")),
        }
    }
}

/// `f64` as Fixed64. A Fixed32 field is widened.
#[derive(Debug, Default)]
pub struct Float64Codec;

impl FieldCodec<f64> for Float64Codec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &f64,
    ) -> Result<()> {
        write_value_header(
            writer,
            session,
            field_id_delta,
            expected,
            &Type::float64(),
            WireType::Fixed64,
        );
        writer.write_f64_le(*value);
        Ok(())
    }

    fn read_value(&self, reader: &mut Reader, session: &mut Session, field: &Field) -> Result<f64> {
        session.references_mut().mark_value_field();
        match field.wire_type() {
            WireType::Fixed64 => reader.read_f64_le(),
            WireType::Fixed32 => Ok(reader.read_f32_le()? as f64),
            _ => Err(field.unsupported("f64")),
        }
    }
}

// --- char ---
/// A Unicode scalar value as VarInt.
#[derive(Debug, Default)]
pub struct CharCodec;

impl FieldCodec<char> for CharCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &char,
    ) -> Result<()> {
        write_value_header(
            writer,
            session,
            field_id_delta,
            expected,
            &Type::char(),
            WireType::VarInt,
        );
        writer.write_var_u32(*value as u32);
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<char> {
        session.references_mut().mark_value_field();
        field.expect_wire_type(WireType::VarInt, "char")?;
        let code = reader.read_var_u32()?;
        char::from_u32(code)
            .ok_or_else(|| Error::Decode(format!("Invalid char code point {}", code)))
    }
}

// --- string ---
/// UTF-8, length-prefixed.
#[derive(Debug, Default)]
pub struct StringCodec;

impl FieldCodec<String> for StringCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &String,
    ) -> Result<()> {
        write_value_header(
            writer,
            session,
            field_id_delta,
            expected,
            &Type::string(),
            WireType::LengthPrefixed,
        );
        writer.write_length_prefixed(value.as_bytes());
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<String> {
        session.references_mut().mark_value_field();
        field.expect_wire_type(WireType::LengthPrefixed, "string")?;
        let bytes = reader.read_length_prefixed()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Decode(format!("Invalid UTF-8: {}", e)))
    }
}

// --- bytes ---
/// Opaque bytes, length-prefixed. Reading is zero-copy when the value lies in one segment.
#[derive(Debug, Default)]
pub struct BytesCodec;

impl FieldCodec<Bytes> for BytesCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &Bytes,
    ) -> Result<()> {
        write_value_header(
            writer,
            session,
            field_id_delta,
            expected,
            &Type::bytes(),
            WireType::LengthPrefixed,
        );
        writer.write_length_prefixed(value);
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<Bytes> {
        session.references_mut().mark_value_field();
        field.expect_wire_type(WireType::LengthPrefixed, "bytes")?;
        reader.read_length_prefixed()
    }
}

// --- duration ---
/// Total nanoseconds as Fixed128.
#[derive(Debug, Default)]
pub struct DurationCodec;

impl FieldCodec<Duration> for DurationCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &Duration,
    ) -> Result<()> {
        write_value_header(
            writer,
            session,
            field_id_delta,
            expected,
            &Type::duration(),
            WireType::Fixed128,
        );
        writer.write_u128_le(value.as_nanos());
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<Duration> {
        session.references_mut().mark_value_field();
        field.expect_wire_type(WireType::Fixed128, "duration")?;
        let nanos = reader.read_u128_le()?;
        let secs = u64::try_from(nanos / NANOS_PER_SEC)
            .map_err(|_| Error::Decode(format!("Value {} too large for duration", nanos)))?;
        Ok(Duration::new(secs, (nanos % NANOS_PER_SEC) as u32))
    }
}
