//! Reference fields: nulls, repeated objects and cycles.

use tracing::trace;

use crate::buffer::{Reader, Writer};
use crate::codec::{carried_runtime_type, Object};
use crate::session::{ReferenceLookup, ReferenceSlot, Session, UnknownFieldMarker};
use crate::tag::{write_field_header, write_field_header_expected, Field, WireType};
use crate::types::Type;
use crate::{Error, Result};

/// Writes `value` as a reference field if it is null or was already written in this session.
///
/// Returns `true` if the field is complete. On `false` the value has been assigned a fresh
/// reference id and the caller must write its body.
pub fn write_reference_field(
    writer: &mut Writer,
    session: &mut Session,
    field_id_delta: u32,
    expected: &Type,
    value: &Object,
) -> Result<bool> {
    match session.references_mut().get_or_add_reference(value) {
        ReferenceLookup::Null => {
            write_field_header_expected(writer, field_id_delta, WireType::Reference);
            writer.write_var_u32(0);
            Ok(true)
        }
        ReferenceLookup::Existing(id) => {
            write_field_header(
                writer,
                session,
                field_id_delta,
                expected,
                value.runtime_type(),
                WireType::Reference,
            );
            writer.write_var_u32(id);
            Ok(true)
        }
        ReferenceLookup::Added(_) => Ok(false),
    }
}

/// Reads the body of a `Reference` field: a varint id, 0 for null.
///
/// An id pointing at a skipped field is resolved by reading that field's value now.
///
/// # Errors
/// `ReferenceNotFound` if the id was never recorded.
pub fn read_reference(
    reader: &mut Reader,
    session: &mut Session,
    field: &Field,
    expected: &Type,
) -> Result<Object> {
    field.expect_wire_type(WireType::Reference, "reference")?;
    session.references_mut().mark_value_field();
    let id = reader.read_var_u32()?;
    if id == 0 {
        return Ok(Object::null());
    }
    match session.references().get(id) {
        Some(ReferenceSlot::Object(object)) => Ok(object.clone()),
        Some(ReferenceSlot::UnknownField(marker)) => {
            let marker = marker.clone();
            deserialize_from_marker(reader, session, &marker, id, expected)
        }
        _ => Err(Error::ReferenceNotFound {
            reference: id,
            expected: expected.clone(),
            known: session.references().snapshot(),
        }),
    }
}

/// Reads the value of a previously skipped field, as if it were being read for the first time
/// under reference id `id`. The session's reference counter is restored afterwards.
fn deserialize_from_marker(
    reader: &Reader,
    session: &mut Session,
    marker: &UnknownFieldMarker,
    id: u32,
    expected: &Type,
) -> Result<Object> {
    trace!(reference = id, position = marker.position, "reading skipped field");
    let mut fork = reader.fork_at(marker.position)?;
    let ty = carried_runtime_type(expected, &marker.field)?
        .cloned()
        .unwrap_or_else(|| expected.clone());
    let codec = session.provider().object_codec(&ty)?;

    let saved = session.references().current_reference_id();
    session.references_mut().set_current_reference_id(id - 1);
    let result = codec.read_value(&mut fork, session, &marker.field);
    session.references_mut().set_current_reference_id(saved);
    result
}
