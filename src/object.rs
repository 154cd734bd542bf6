//! Codecs that frame composite values.
//!
//! A composite is written as a `TagDelimited` field: the header, the fields produced by its
//! serializer, then an end-of-object marker. Reference types go through reference tracking
//! first, so repeated and cyclic instances are written once.

use std::sync::Arc;

use tracing::trace;

use crate::buffer::{Reader, Writer};
use crate::codec::{
    carried_runtime_type, mismatch, Activator, Described, FieldCodec, Object, ObjectValue,
    PartialSerializer, Shared, ValueSerializer,
};
use crate::reference::{read_reference, write_reference_field};
use crate::session::Session;
use crate::tag::{write_end_object, write_field_header, Field, WireType};
use crate::types::{Type, TypeKind};
use crate::{Error, Result};

/// Framing codec for a reference type with a registered [`PartialSerializer`].
pub struct ConcreteTypeCodec<T> {
    ty: Type,
    serializer: Arc<dyn PartialSerializer<T>>,
    activator: Arc<dyn Activator<T>>,
}

impl<T: Described + Send + Sync + 'static> ConcreteTypeCodec<T> {
    pub fn new(
        serializer: Arc<dyn PartialSerializer<T>>,
        activator: Arc<dyn Activator<T>>,
    ) -> Self {
        Self {
            ty: T::described_type(),
            serializer,
            activator,
        }
    }
}

impl<T: Described + Send + Sync + 'static> FieldCodec<Option<Shared<T>>> for ConcreteTypeCodec<T> {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &Option<Shared<T>>,
    ) -> Result<()> {
        let object = value.clone().into_object();
        if write_reference_field(writer, session, field_id_delta, expected, &object)? {
            return Ok(());
        }
        let Some(instance) = value else {
            return Ok(());
        };

        write_field_header(
            writer,
            session,
            field_id_delta,
            expected,
            Some(&self.ty),
            WireType::TagDelimited,
        );
        {
            let guard = instance.read();
            self.serializer.serialize(writer, session, &guard)?;
        }
        write_end_object(writer);
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<Option<Shared<T>>> {
        if field.is_reference() {
            let object = read_reference(reader, session, field, &self.ty)?;
            return Option::<Shared<T>>::from_object(object);
        }
        if let Some(actual) = carried_runtime_type(&self.ty, field)? {
            let codec = session.provider().object_codec(actual)?;
            let object = codec.read_value(reader, session, field)?;
            return Option::<Shared<T>>::from_object(object);
        }
        field.expect_wire_type(WireType::TagDelimited, "object")?;

        let id = session.references_mut().create_record_placeholder();
        let instance = Shared::new(self.activator.create());
        session
            .references_mut()
            .record_object_at(id, Object::from_shared(self.ty.clone(), instance.clone()));
        trace!(reference = id, ty = %self.ty, "reading object");
        {
            let mut guard = instance.write();
            self.serializer.deserialize(reader, session, &mut guard)?;
        }
        Ok(Some(instance))
    }
}

/// Framing codec for a value type with a registered [`ValueSerializer`]. Value types are never
/// reference tracked.
pub struct ValueSerializerCodec<T> {
    ty: Type,
    serializer: Arc<dyn ValueSerializer<T>>,
}

impl<T: ObjectValue + Default> ValueSerializerCodec<T> {
    pub fn new(serializer: Arc<dyn ValueSerializer<T>>) -> Self {
        Self {
            ty: T::static_type(),
            serializer,
        }
    }
}

impl<T: ObjectValue + Default> FieldCodec<T> for ValueSerializerCodec<T> {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &T,
    ) -> Result<()> {
        session.references_mut().mark_value_field();
        write_field_header(
            writer,
            session,
            field_id_delta,
            expected,
            Some(&self.ty),
            WireType::TagDelimited,
        );
        self.serializer.serialize(writer, session, value)?;
        write_end_object(writer);
        Ok(())
    }

    fn read_value(&self, reader: &mut Reader, session: &mut Session, field: &Field) -> Result<T> {
        session.references_mut().mark_value_field();
        field.expect_wire_type(WireType::TagDelimited, "value type")?;
        let mut value = T::default();
        self.serializer.deserialize(reader, session, &mut value)?;
        Ok(value)
    }
}

/// Codec for fields declared as an interface, an abstract class or `object`.
///
/// Writing dispatches on the value's runtime type; reading requires the header to carry one.
pub struct AbstractTypeCodec {
    ty: Type,
}

impl AbstractTypeCodec {
    pub fn new(ty: Type) -> Self {
        Self { ty }
    }
}

impl FieldCodec<Object> for AbstractTypeCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &Object,
    ) -> Result<()> {
        let Some(actual) = value.runtime_type() else {
            write_reference_field(writer, session, field_id_delta, expected, value)?;
            return Ok(());
        };
        if actual.is_abstract() {
            return Err(Error::UnsupportedType {
                ty: actual.clone(),
                reason: "value has an abstract runtime type",
            });
        }
        let codec = session.provider().object_codec(actual)?;
        codec.write_field(writer, session, field_id_delta, expected, value)
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<Object> {
        if field.is_reference() {
            return read_reference(reader, session, field, &self.ty);
        }
        let actual = carried_runtime_type(&self.ty, field)?.ok_or_else(|| Error::UnsupportedType {
            ty: self.ty.clone(),
            reason: "field of an abstract type carries no runtime type",
        })?;
        if actual.is_abstract() {
            return Err(Error::UnsupportedType {
                ty: actual.clone(),
                reason: "field carries an abstract runtime type",
            });
        }
        let codec = session.provider().object_codec(actual)?;
        codec.read_value(reader, session, field)
    }
}

/// The integral value of an enumeration. The enumeration itself is the object's runtime type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EnumValue(pub i64);

impl EnumValue {
    pub fn into_object(self, ty: &Type) -> Object {
        Object::new(ty.clone(), self)
    }

    pub fn from_object(object: &Object) -> Result<EnumValue> {
        object
            .downcast_ref::<EnumValue>()
            .copied()
            .ok_or_else(|| mismatch(Type::int64(), object))
    }
}

/// Enumerations as ZigZag VarInt.
pub struct EnumCodec {
    ty: Type,
}

impl EnumCodec {
    pub fn new(ty: Type) -> Self {
        Self { ty }
    }
}

impl FieldCodec<Object> for EnumCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &Object,
    ) -> Result<()> {
        let EnumValue(raw) = EnumValue::from_object(value)?;
        session.references_mut().mark_value_field();
        write_field_header(
            writer,
            session,
            field_id_delta,
            expected,
            Some(&self.ty),
            WireType::VarInt,
        );
        writer.write_var_i64(raw);
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<Object> {
        session.references_mut().mark_value_field();
        field.expect_wire_type(WireType::VarInt, "enum")?;
        let raw = reader.read_var_i64()?;
        Ok(EnumValue(raw).into_object(&self.ty))
    }
}

/// Generalized codec covering every enumeration type.
#[derive(Debug, Default)]
pub struct EnumCodecs;

impl crate::provider::GeneralizedCodec for EnumCodecs {
    fn is_supported_type(&self, ty: &Type) -> bool {
        matches!(ty.kind(), TypeKind::Enum)
    }

    fn codec_for(&self, ty: &Type) -> Arc<dyn FieldCodec<Object>> {
        Arc::new(EnumCodec::new(ty.clone()))
    }
}
