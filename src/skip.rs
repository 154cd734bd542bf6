//! Skipping fields the reader does not recognize.

use tracing::trace;

use crate::buffer::Reader;
use crate::session::{Session, UnknownFieldMarker};
use crate::tag::{read_field_header, Field, WireType};
use crate::varint;
use crate::Result;

/// Consumes the value of `field`, whose header has already been read.
///
/// A placeholder is recorded under the field's reference id so that a later reference to it
/// can still be resolved.
pub fn consume_unknown_field(
    reader: &mut Reader,
    session: &mut Session,
    field: &Field,
) -> Result<()> {
    if field.is_reference() {
        session.references_mut().mark_value_field();
        reader.read_var_u32()?;
        return Ok(());
    }

    let position = reader.position();
    let id = session.references_mut().record_unknown_field(UnknownFieldMarker {
        field: field.clone(),
        position,
    });
    trace!(reference = id, position, wire_type = ?field.wire_type(), "skipping unknown field");

    match field.wire_type() {
        WireType::VarInt => varint::skip(reader),
        WireType::TagDelimited => consume_tag_delimited(reader, session),
        WireType::LengthPrefixed => {
            let len = reader.read_var_u32()? as usize;
            reader.skip(len)
        }
        WireType::Fixed32 => reader.skip(4),
        WireType::Fixed64 => reader.skip(8),
        WireType::Fixed128 => reader.skip(16),
        WireType::Reference | WireType::Extended => Err(field.unsupported("unknown field")),
    }
}

/// Consumes every field of a nested object through its end-of-object marker.
fn consume_tag_delimited(reader: &mut Reader, session: &mut Session) -> Result<()> {
    loop {
        let field = read_field_header(reader, session)?;
        if field.is_end_object() {
            return Ok(());
        }
        if field.is_end_base_fields() {
            continue;
        }
        consume_unknown_field(reader, session, &field)?;
    }
}

/// Consumes the remaining fields of the current segment, up to and including its
/// end-of-base or end-of-object marker.
pub fn consume_end_base_or_end_object(reader: &mut Reader, session: &mut Session) -> Result<()> {
    loop {
        let field = read_field_header(reader, session)?;
        if field.is_end_base_or_end_object() {
            return Ok(());
        }
        consume_unknown_field(reader, session, &field)?;
    }
}
