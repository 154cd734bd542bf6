//! Codecs for optional third-party types, each behind its cargo feature.

#[cfg(feature = "chrono")]
use chrono::{DateTime, Utc};
#[cfg(feature = "rust_decimal")]
use rust_decimal::Decimal;
#[cfg(feature = "uuid")]
use uuid::Uuid;

#[cfg(any(feature = "uuid", feature = "chrono", feature = "rust_decimal"))]
use crate::{
    buffer::{Reader, Writer},
    codec::{unbox, FieldCodec, Object, ObjectValue},
    session::Session,
    tag::{write_field_header, Field, WireType},
    types::Type,
    Result,
};
#[cfg(feature = "chrono")]
use crate::Error;

use crate::provider::CodecProviderBuilder;

/// Adds the codecs of every enabled feature.
pub(crate) fn register(builder: CodecProviderBuilder) -> CodecProviderBuilder {
    #[cfg(feature = "uuid")]
    let builder = builder.add_codec::<Uuid>(GuidCodec);
    #[cfg(feature = "chrono")]
    let builder = builder.add_codec::<DateTime<Utc>>(DateTimeCodec);
    #[cfg(feature = "rust_decimal")]
    let builder = builder.add_codec::<Decimal>(DecimalCodec);
    builder
}

macro_rules! boxed_feature_value {
    ($feature:literal, $ty:ty => $type_fn:ident) => {
        #[cfg(feature = $feature)]
        impl ObjectValue for $ty {
            fn static_type() -> Type {
                Type::$type_fn()
            }

            fn into_object(self) -> Object {
                Object::new(Type::$type_fn(), self)
            }

            fn from_object(object: Object) -> Result<Self> {
                unbox(&object)
            }
        }
    };
}

boxed_feature_value!("uuid", Uuid => guid);
boxed_feature_value!("chrono", DateTime<Utc> => datetime);
boxed_feature_value!("rust_decimal", Decimal => decimal);

// --- Uuid ---
/// `uuid::Uuid` as Fixed128, little-endian.
#[cfg(feature = "uuid")]
#[derive(Debug, Default)]
pub struct GuidCodec;

#[cfg(feature = "uuid")]
impl FieldCodec<Uuid> for GuidCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &Uuid,
    ) -> Result<()> {
        session.references_mut().mark_value_field();
        let guid = Type::guid();
        write_field_header(
            writer,
            session,
            field_id_delta,
            expected,
            Some(&guid),
            WireType::Fixed128,
        );
        writer.write_u128_le(value.as_u128());
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<Uuid> {
        session.references_mut().mark_value_field();
        field.expect_wire_type(WireType::Fixed128, "guid")?;
        Ok(Uuid::from_u128(reader.read_u128_le()?))
    }
}

// --- DateTime<Utc> ---
/// `chrono::DateTime<Utc>` as Fixed128: seconds since the Unix epoch in the low 64 bits,
/// nanoseconds in the high 64 bits.
#[cfg(feature = "chrono")]
#[derive(Debug, Default)]
pub struct DateTimeCodec;

#[cfg(feature = "chrono")]
impl FieldCodec<DateTime<Utc>> for DateTimeCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &DateTime<Utc>,
    ) -> Result<()> {
        session.references_mut().mark_value_field();
        let datetime = Type::datetime();
        write_field_header(
            writer,
            session,
            field_id_delta,
            expected,
            Some(&datetime),
            WireType::Fixed128,
        );
        let seconds = value.timestamp() as u64 as u128;
        let nanos = value.timestamp_subsec_nanos() as u128;
        writer.write_u128_le(seconds | (nanos << 64));
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<DateTime<Utc>> {
        session.references_mut().mark_value_field();
        field.expect_wire_type(WireType::Fixed128, "datetime")?;
        let raw = reader.read_u128_le()?;
        let seconds = raw as u64 as i64;
        let nanos = (raw >> 64) as u64;
        let nanos = u32::try_from(nanos)
            .map_err(|_| Error::Decode(format!("Value {} too large for nanoseconds", nanos)))?;
        DateTime::from_timestamp(seconds, nanos)
            .ok_or_else(|| Error::Decode(format!("Invalid timestamp: {}s {}ns", seconds, nanos)))
    }
}

// --- Decimal ---
/// `rust_decimal::Decimal` as Fixed128, in its own 16-byte serialized form.
#[cfg(feature = "rust_decimal")]
#[derive(Debug, Default)]
pub struct DecimalCodec;

#[cfg(feature = "rust_decimal")]
impl FieldCodec<Decimal> for DecimalCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &Decimal,
    ) -> Result<()> {
        session.references_mut().mark_value_field();
        let decimal = Type::decimal();
        write_field_header(
            writer,
            session,
            field_id_delta,
            expected,
            Some(&decimal),
            WireType::Fixed128,
        );
        writer.write_bytes(&value.serialize());
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<Decimal> {
        session.references_mut().mark_value_field();
        field.expect_wire_type(WireType::Fixed128, "decimal")?;
        let bytes = reader.read_bytes(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&bytes);
        Ok(Decimal::deserialize(raw))
    }
}
