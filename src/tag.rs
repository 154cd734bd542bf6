//! Field headers.
//!
//! Every field starts with a one-byte [`Tag`], laid out MSB first as `[www][ss][fff]`:
//!
//! - `www`: the [`WireType`]
//! - `ss`: the [`SchemaType`], or the [`ExtendedWireType`] when `www` is `Extended`
//! - `fff`: the field-id delta; `0b111` means an extended delta follows as a varint
//!
//! The schema type decides what follows the tag (and the extended delta, if any): nothing for
//! `Expected`, a varint id for `WellKnown` and `Referenced`, a length-prefixed type name for
//! `Encoded`.

use crate::buffer::{Reader, Writer};
use crate::session::Session;
use crate::types::{CarriedType, Type};
use crate::{Error, Result};

/// Physical encoding of a field's value.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WireType {
    VarInt = 0b000 << 5,
    /// A nested composite, terminated by an `EndTagDelimited` marker.
    TagDelimited = 0b001 << 5,
    LengthPrefixed = 0b010 << 5,
    Fixed32 = 0b011 << 5,
    Fixed64 = 0b100 << 5,
    Fixed128 = 0b101 << 5,
    /// A varint id of a previously seen object.
    Reference = 0b110 << 5,
    /// A control marker; schema and field-id bits are reinterpreted.
    Extended = 0b111 << 5,
}

/// How a field's runtime type is communicated, in precedence order.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchemaType {
    /// Runtime type equals the expected type. Nothing follows.
    Expected = 0b00 << 3,
    /// A varint index into the well-known type table follows.
    WellKnown = 0b01 << 3,
    /// The length-prefixed UTF-8 type name follows.
    Encoded = 0b10 << 3,
    /// A varint index into the session's referenced-type table follows.
    Referenced = 0b11 << 3,
}

/// Control markers carried by `Extended` tags.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExtendedWireType {
    EndTagDelimited = 0b00 << 3,
    EndBaseFields = 0b01 << 3,
}

/// The one-byte field control structure.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u8);

impl Tag {
    pub const WIRE_TYPE_MASK: u8 = 0b1110_0000;
    pub const SCHEMA_TYPE_MASK: u8 = 0b0001_1000;
    pub const FIELD_ID_MASK: u8 = 0b0000_0111;
    /// Field-id bits value meaning "extended field id follows".
    pub const FIELD_ID_COMPLETE_MASK: u8 = Self::FIELD_ID_MASK;
    /// Largest delta that fits in the tag itself.
    pub const MAX_EMBEDDED_FIELD_ID_DELTA: u32 = Self::FIELD_ID_COMPLETE_MASK as u32 - 1;

    #[inline]
    pub const fn from_byte(byte: u8) -> Self {
        Tag(byte)
    }

    /// Builds a regular tag. `field_id_delta` values above the embedded maximum saturate to the
    /// extended marker.
    pub fn new(wire_type: WireType, schema_type: SchemaType, field_id_delta: u32) -> Self {
        debug_assert!(wire_type != WireType::Extended);
        let embedded = if field_id_delta > Self::MAX_EMBEDDED_FIELD_ID_DELTA {
            Self::FIELD_ID_COMPLETE_MASK
        } else {
            field_id_delta as u8
        };
        Tag(wire_type as u8 | schema_type as u8 | embedded)
    }

    pub const fn extended(extended_wire_type: ExtendedWireType) -> Self {
        Tag(WireType::Extended as u8 | extended_wire_type as u8)
    }

    #[inline]
    pub const fn byte(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn wire_type(self) -> WireType {
        match self.0 & Self::WIRE_TYPE_MASK {
            0b0000_0000 => WireType::VarInt,
            0b0010_0000 => WireType::TagDelimited,
            0b0100_0000 => WireType::LengthPrefixed,
            0b0110_0000 => WireType::Fixed32,
            0b1000_0000 => WireType::Fixed64,
            0b1010_0000 => WireType::Fixed128,
            0b1100_0000 => WireType::Reference,
            _ => WireType::Extended,
        }
    }

    #[inline]
    pub fn is_extended(self) -> bool {
        self.wire_type() == WireType::Extended
    }

    pub fn schema_type(self) -> Result<SchemaType> {
        if self.is_extended() {
            return Err(Error::MalformedHeader {
                tag: self,
                accessor: "schema_type",
            });
        }
        Ok(match self.0 & Self::SCHEMA_TYPE_MASK {
            0b0000_0000 => SchemaType::Expected,
            0b0000_1000 => SchemaType::WellKnown,
            0b0001_0000 => SchemaType::Encoded,
            _ => SchemaType::Referenced,
        })
    }

    pub fn extended_wire_type(self) -> Result<ExtendedWireType> {
        if !self.is_extended() {
            return Err(Error::MalformedHeader {
                tag: self,
                accessor: "extended_wire_type",
            });
        }
        match self.0 & Self::SCHEMA_TYPE_MASK {
            0b0000_0000 => Ok(ExtendedWireType::EndTagDelimited),
            0b0000_1000 => Ok(ExtendedWireType::EndBaseFields),
            _ => Err(Error::MalformedHeader {
                tag: self,
                accessor: "extended_wire_type",
            }),
        }
    }

    /// The embedded field-id delta, or `None` if an extended delta follows the tag.
    pub fn embedded_field_id(self) -> Result<Option<u8>> {
        if self.is_extended() {
            return Err(Error::MalformedHeader {
                tag: self,
                accessor: "field_id",
            });
        }
        let bits = self.0 & Self::FIELD_ID_MASK;
        Ok((bits != Self::FIELD_ID_COMPLETE_MASK).then_some(bits))
    }
}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tag({:#010b}, {:?})", self.0, self.wire_type())
    }
}

/// A decoded field header: the tag plus its field-id delta and carried runtime type.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    tag: Tag,
    field_id_delta: u32,
    field_type: Option<CarriedType>,
}

impl Field {
    pub fn new(tag: Tag, field_id_delta: u32, field_type: Option<Type>) -> Self {
        Self::with_carried(tag, field_id_delta, field_type.map(CarriedType::Resolved))
    }

    pub fn with_carried(tag: Tag, field_id_delta: u32, field_type: Option<CarriedType>) -> Self {
        Self {
            tag,
            field_id_delta,
            field_type,
        }
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    #[inline]
    pub fn wire_type(&self) -> WireType {
        self.tag.wire_type()
    }

    /// The delta from the previous field id in the same object.
    ///
    /// # Errors
    /// `MalformedHeader` for control markers, which carry no field id.
    pub fn field_id_delta(&self) -> Result<u32> {
        self.tag.embedded_field_id()?;
        Ok(self.field_id_delta)
    }

    pub fn schema_type(&self) -> Result<SchemaType> {
        self.tag.schema_type()
    }

    pub fn extended_wire_type(&self) -> Result<ExtendedWireType> {
        self.tag.extended_wire_type()
    }

    /// The runtime type carried by the header; `None` means "the expected type".
    ///
    /// # Errors
    /// `UnknownTypeName` or `TypeNotAllowed` if the header named a type this reader cannot
    /// materialize. Skipping such a field does not need its type.
    pub fn field_type(&self) -> Result<Option<&Type>> {
        self.field_type.as_ref().map(CarriedType::resolved).transpose()
    }

    /// The carried type as read, including names that did not resolve.
    #[inline]
    pub fn carried_type(&self) -> Option<&CarriedType> {
        self.field_type.as_ref()
    }

    #[inline]
    pub fn is_reference(&self) -> bool {
        self.wire_type() == WireType::Reference
    }

    pub fn is_end_object(&self) -> bool {
        self.tag == Tag::extended(ExtendedWireType::EndTagDelimited)
    }

    pub fn is_end_base_fields(&self) -> bool {
        self.tag == Tag::extended(ExtendedWireType::EndBaseFields)
    }

    pub fn is_end_base_or_end_object(&self) -> bool {
        self.is_end_object() || self.is_end_base_fields()
    }

    /// Fails with `UnsupportedWireType` unless the field has `wire_type`.
    pub fn expect_wire_type(&self, wire_type: WireType, context: &'static str) -> Result<()> {
        if self.wire_type() != wire_type {
            return Err(self.unsupported(context));
        }
        Ok(())
    }

    pub(crate) fn unsupported(&self, context: &'static str) -> Error {
        Error::UnsupportedWireType {
            wire_type: self.wire_type(),
            field: Box::new(self.clone()),
            context,
        }
    }
}

/// Writes a field header, choosing the schema type by precedence:
/// Expected, then WellKnown, then Referenced, then Encoded.
///
/// `actual` is the value's runtime type; `None` (a null value) always counts as expected.
pub fn write_field_header(
    writer: &mut Writer,
    session: &mut Session,
    field_id_delta: u32,
    expected: &Type,
    actual: Option<&Type>,
    wire_type: WireType,
) {
    let actual = match actual {
        Some(actual) if actual != expected => actual,
        _ => {
            write_field_header_expected(writer, field_id_delta, wire_type);
            return;
        }
    };

    if let Some(id) = session.well_known_types().id_of(actual) {
        write_tag(writer, wire_type, SchemaType::WellKnown, field_id_delta);
        writer.write_var_u32(id);
    } else if let Some(id) = session.referenced_types().id_of(actual) {
        write_tag(writer, wire_type, SchemaType::Referenced, field_id_delta);
        writer.write_var_u32(id);
    } else {
        write_tag(writer, wire_type, SchemaType::Encoded, field_id_delta);
        session.type_codec().write_encoded_type(writer, actual);
        session.referenced_types_mut().record(actual.clone());
    }
}

/// Writes a header whose runtime type equals the expected type.
pub fn write_field_header_expected(writer: &mut Writer, field_id_delta: u32, wire_type: WireType) {
    write_tag(writer, wire_type, SchemaType::Expected, field_id_delta);
}

fn write_tag(
    writer: &mut Writer,
    wire_type: WireType,
    schema_type: SchemaType,
    field_id_delta: u32,
) {
    let tag = Tag::new(wire_type, schema_type, field_id_delta);
    writer.write_u8(tag.byte());
    if field_id_delta > Tag::MAX_EMBEDDED_FIELD_ID_DELTA {
        writer.write_var_u32(field_id_delta);
    }
}

/// Terminates a tag-delimited object.
pub fn write_end_object(writer: &mut Writer) {
    writer.write_u8(Tag::extended(ExtendedWireType::EndTagDelimited).byte());
}

/// Separates base-type fields from derived-type fields.
pub fn write_end_base(writer: &mut Writer) {
    writer.write_u8(Tag::extended(ExtendedWireType::EndBaseFields).byte());
}

/// Reads a field header.
///
/// A carried type name is resolved here, but a name that does not resolve only fails once the
/// field's value is read through [`Field::field_type`].
pub fn read_field_header(reader: &mut Reader, session: &mut Session) -> Result<Field> {
    let tag = Tag::from_byte(reader.read_u8()?);
    if tag.is_extended() {
        tag.extended_wire_type()?;
        return Ok(Field::new(tag, 0, None));
    }

    let field_id_delta = match tag.embedded_field_id()? {
        Some(embedded) => embedded as u32,
        None => reader.read_var_u32()?,
    };

    let field_type = match tag.schema_type()? {
        SchemaType::Expected => None,
        SchemaType::WellKnown => {
            let id = reader.read_var_u32()?;
            let ty = session
                .well_known_types()
                .get(id)
                .cloned()
                .ok_or_else(|| Error::Decode(format!("Unknown well-known type id {}", id)))?;
            Some(CarriedType::Resolved(ty))
        }
        SchemaType::Referenced => {
            let id = reader.read_var_u32()?;
            let ty = session
                .referenced_types()
                .get(id)
                .cloned()
                .ok_or_else(|| Error::Decode(format!("Unknown referenced type id {}", id)))?;
            Some(ty)
        }
        SchemaType::Encoded => {
            let carried = session.type_codec().read_encoded_type(reader)?;
            session.referenced_types_mut().record_carried(carried.clone());
            Some(carried)
        }
    };

    Ok(Field::with_carried(tag, field_id_delta, field_type))
}

/// Accumulates field-id deltas while reading the fields of one object segment.
///
/// A base-type segment and the derived-type segment after it each start from id zero.
///
/// ```ignore
/// let mut fields = FieldCursor::new();
/// while let Some((id, field)) = fields.next(reader, session)? {
///     match id {
///         0 => name = string_codec.read_value(reader, session, &field)?,
///         _ => skip::consume_unknown_field(reader, session, &field)?,
///     }
/// }
/// ```
#[derive(Debug, Default, Clone)]
pub struct FieldCursor {
    id: u32,
    ended_with: Option<ExtendedWireType>,
}

impl FieldCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the next header. Returns `None` once an end-of-base or end-of-object marker has
    /// been consumed.
    pub fn next(
        &mut self,
        reader: &mut Reader,
        session: &mut Session,
    ) -> Result<Option<(u32, Field)>> {
        let field = read_field_header(reader, session)?;
        if field.tag().is_extended() {
            self.ended_with = Some(field.extended_wire_type()?);
            return Ok(None);
        }
        self.id = self
            .id
            .checked_add(field.field_id_delta()?)
            .ok_or_else(|| Error::Decode("Field id overflow".to_string()))?;
        Ok(Some((self.id, field)))
    }

    /// The marker that ended the segment, once it has ended.
    pub fn ended_with(&self) -> Option<ExtendedWireType> {
        self.ended_with
    }
}
