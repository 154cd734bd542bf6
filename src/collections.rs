//! Lists, dictionaries and arrays.
//!
//! All collections are reference types written as `TagDelimited` objects. Field 0 carries the
//! length (one field per dimension for multi-dimensional arrays) and field 1 carries the
//! elements, each element after the first at delta 0. Dictionaries interleave keys and values
//! in field 1.

use std::sync::{Arc, LazyLock};

use tracing::trace;

use crate::buffer::{Reader, Writer};
use crate::codec::{carried_runtime_type, mismatch, FieldCodec, Object, ObjectValue, Shared};
use crate::core::IntegerCodec;
use crate::reference::{read_reference, write_reference_field};
use crate::session::Session;
use crate::skip::consume_unknown_field;
use crate::tag::{write_end_object, write_field_header, Field, FieldCursor, WireType};
use crate::types::Type;
use crate::{Error, Result};

const LENGTH_FIELD: u32 = 0;
const ELEMENTS_FIELD: u32 = 1;

static LIST: LazyLock<Type> = LazyLock::new(|| Type::generic_definition("List", 1, false));
static DICTIONARY: LazyLock<Type> =
    LazyLock::new(|| Type::generic_definition("Dictionary", 2, false));

/// The open `List<T>` definition.
pub fn list_definition() -> Type {
    LIST.clone()
}

/// The open `Dictionary<K,V>` definition.
pub fn dictionary_definition() -> Type {
    DICTIONARY.clone()
}

pub fn list_of(element: &Type) -> Type {
    Type::construct(&LIST, vec![element.clone()])
}

pub fn dictionary_of(key: &Type, value: &Type) -> Type {
    Type::construct(&DICTIONARY, vec![key.clone(), value.clone()])
}

/// A new, empty list of `element`.
pub fn new_list(element: &Type, items: Vec<Object>) -> Object {
    Object::from_shared(list_of(element), Shared::new(items))
}

pub fn new_dictionary(key: &Type, value: &Type, entries: Vec<(Object, Object)>) -> Object {
    Object::from_shared(dictionary_of(key, value), Shared::new(entries))
}

/// A single-dimensional array of `element`.
pub fn new_array(element: &Type, items: Vec<Object>) -> Object {
    Object::from_shared(Type::array(element, 1), Shared::new(items))
}

/// Number of elements in an array of `dimensions`.
fn element_count(dimensions: &[usize]) -> Result<usize> {
    dimensions
        .iter()
        .try_fold(1usize, |count, &dimension| count.checked_mul(dimension))
        .ok_or_else(|| Error::Decode(format!("Array dimensions {:?} overflow", dimensions)))
}

/// Row-major storage of a multi-dimensional array.
#[derive(Clone, Debug, Default)]
pub struct MultiDimensionalArray {
    pub dimensions: Vec<usize>,
    pub items: Vec<Object>,
}

impl MultiDimensionalArray {
    pub fn new(dimensions: Vec<usize>, items: Vec<Object>) -> Result<Self> {
        let expected = element_count(&dimensions)?;
        if expected != items.len() {
            return Err(Error::Decode(format!(
                "Array of dimensions {:?} needs {} items, got {}",
                dimensions,
                expected,
                items.len()
            )));
        }
        Ok(Self { dimensions, items })
    }

    pub fn into_object(self, element: &Type) -> Object {
        let ty = Type::array(element, self.dimensions.len());
        Object::from_shared(ty, Shared::new(self))
    }
}

/// `Vec<T>` travels as a single-dimensional `T[]`.
impl<T: ObjectValue> ObjectValue for Vec<T> {
    fn static_type() -> Type {
        Type::array(&T::static_type(), 1)
    }

    fn into_object(self) -> Object {
        let items = self.into_iter().map(ObjectValue::into_object).collect();
        new_array(&T::static_type(), items)
    }

    fn from_object(object: Object) -> Result<Self> {
        let shared = object
            .downcast_shared::<Vec<Object>>()
            .ok_or_else(|| mismatch(Self::static_type(), &object))?;
        let items = shared.read();
        items.iter().cloned().map(T::from_object).collect()
    }
}

fn write_length(
    writer: &mut Writer,
    session: &mut Session,
    field_id_delta: u32,
    len: usize,
) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| Error::Decode(format!("Length {} too large", len)))?;
    IntegerCodec::<u32>::new().write_field(writer, session, field_id_delta, &Type::uint32(), &len)
}

fn read_length(reader: &mut Reader, session: &mut Session, field: &Field) -> Result<usize> {
    let len: u32 = IntegerCodec::<u32>::new().read_value(reader, session, field)?;
    Ok(len as usize)
}

/// Shared prologue of collection reads: references, runtime-type dispatch and the placeholder
/// for the collection being built.
enum Prologue {
    Done(Object),
    Build(u32),
}

fn read_prologue(
    reader: &mut Reader,
    session: &mut Session,
    field: &Field,
    ty: &Type,
) -> Result<Prologue> {
    if field.is_reference() {
        return read_reference(reader, session, field, ty).map(Prologue::Done);
    }
    if let Some(actual) = carried_runtime_type(ty, field)? {
        let codec = session.provider().object_codec(actual)?;
        return codec.read_value(reader, session, field).map(Prologue::Done);
    }
    field.expect_wire_type(WireType::TagDelimited, "collection")?;
    Ok(Prologue::Build(session.references_mut().create_record_placeholder()))
}

/// Writes the header of a collection, or the whole field if it is a null or repeated
/// reference. Returns `false` when nothing more needs to be written.
fn write_prologue(
    writer: &mut Writer,
    session: &mut Session,
    field_id_delta: u32,
    expected: &Type,
    ty: &Type,
    value: &Object,
) -> Result<bool> {
    if write_reference_field(writer, session, field_id_delta, expected, value)? {
        return Ok(false);
    }
    write_field_header(writer, session, field_id_delta, expected, Some(ty), WireType::TagDelimited);
    Ok(true)
}

fn write_elements<'a>(
    writer: &mut Writer,
    session: &mut Session,
    codec: &Arc<dyn FieldCodec<Object>>,
    element: &Type,
    items: impl Iterator<Item = &'a Object>,
    first_delta: u32,
) -> Result<()> {
    let mut delta = first_delta;
    for item in items {
        codec.write_field(writer, session, delta, element, item)?;
        delta = 0;
    }
    Ok(())
}

/// Codec for `List<T>`, holding `Shared<Vec<Object>>`.
pub struct ListCodec {
    ty: Type,
    element: Type,
}

impl ListCodec {
    /// # Errors
    /// `UnsupportedType` if `ty` is not a construction of `List`.
    pub fn new(ty: &Type) -> Result<Self> {
        match ty.generic_arguments() {
            [element] if ty.generic_definition_of() == Some(&*LIST) => Ok(Self {
                ty: ty.clone(),
                element: element.clone(),
            }),
            _ => Err(Error::UnsupportedType {
                ty: ty.clone(),
                reason: "not a list construction",
            }),
        }
    }
}

impl FieldCodec<Object> for ListCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &Object,
    ) -> Result<()> {
        if !write_prologue(writer, session, field_id_delta, expected, &self.ty, value)? {
            return Ok(());
        }
        let shared = value
            .downcast_shared::<Vec<Object>>()
            .ok_or_else(|| mismatch(self.ty.clone(), value))?;
        let codec = session.provider().object_codec(&self.element)?;
        let items = shared.read();
        write_length(writer, session, LENGTH_FIELD, items.len())?;
        write_elements(writer, session, &codec, &self.element, items.iter(), ELEMENTS_FIELD)?;
        write_end_object(writer);
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<Object> {
        let id = match read_prologue(reader, session, field, &self.ty)? {
            Prologue::Done(object) => return Ok(object),
            Prologue::Build(id) => id,
        };
        let list = Shared::new(Vec::new());
        let object = Object::from_shared(self.ty.clone(), list.clone());
        session.references_mut().record_object_at(id, object.clone());

        let codec = session.provider().object_codec(&self.element)?;
        let mut fields = FieldCursor::new();
        while let Some((field_id, field)) = fields.next(reader, session)? {
            match field_id {
                LENGTH_FIELD => {
                    let len = read_length(reader, session, &field)?;
                    list.write().reserve(len.min(reader.remaining()));
                }
                ELEMENTS_FIELD => {
                    let item = codec.read_value(reader, session, &field)?;
                    list.write().push(item);
                }
                _ => consume_unknown_field(reader, session, &field)?,
            }
        }
        Ok(object)
    }
}

/// Codec for `Dictionary<K,V>`, holding `Shared<Vec<(Object, Object)>>` in insertion order.
pub struct DictionaryCodec {
    ty: Type,
    key: Type,
    value: Type,
}

impl DictionaryCodec {
    /// # Errors
    /// `UnsupportedType` if `ty` is not a construction of `Dictionary`.
    pub fn new(ty: &Type) -> Result<Self> {
        match ty.generic_arguments() {
            [key, value] if ty.generic_definition_of() == Some(&*DICTIONARY) => Ok(Self {
                ty: ty.clone(),
                key: key.clone(),
                value: value.clone(),
            }),
            _ => Err(Error::UnsupportedType {
                ty: ty.clone(),
                reason: "not a dictionary construction",
            }),
        }
    }
}

impl FieldCodec<Object> for DictionaryCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &Object,
    ) -> Result<()> {
        if !write_prologue(writer, session, field_id_delta, expected, &self.ty, value)? {
            return Ok(());
        }
        let shared = value
            .downcast_shared::<Vec<(Object, Object)>>()
            .ok_or_else(|| mismatch(self.ty.clone(), value))?;
        let key_codec = session.provider().object_codec(&self.key)?;
        let value_codec = session.provider().object_codec(&self.value)?;
        let entries = shared.read();
        write_length(writer, session, LENGTH_FIELD, entries.len())?;
        let mut delta = ELEMENTS_FIELD;
        for (key, value) in entries.iter() {
            key_codec.write_field(writer, session, delta, &self.key, key)?;
            value_codec.write_field(writer, session, 0, &self.value, value)?;
            delta = 0;
        }
        write_end_object(writer);
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<Object> {
        let id = match read_prologue(reader, session, field, &self.ty)? {
            Prologue::Done(object) => return Ok(object),
            Prologue::Build(id) => id,
        };
        let entries = Shared::new(Vec::new());
        let object = Object::from_shared(self.ty.clone(), entries.clone());
        session.references_mut().record_object_at(id, object.clone());

        let key_codec = session.provider().object_codec(&self.key)?;
        let value_codec = session.provider().object_codec(&self.value)?;
        let mut pending_key: Option<Object> = None;
        let mut fields = FieldCursor::new();
        while let Some((field_id, field)) = fields.next(reader, session)? {
            match field_id {
                LENGTH_FIELD => {
                    let len = read_length(reader, session, &field)?;
                    entries.write().reserve(len.min(reader.remaining()));
                }
                ELEMENTS_FIELD => match pending_key.take() {
                    None => pending_key = Some(key_codec.read_value(reader, session, &field)?),
                    Some(key) => {
                        let value = value_codec.read_value(reader, session, &field)?;
                        entries.write().push((key, value));
                    }
                },
                _ => consume_unknown_field(reader, session, &field)?,
            }
        }
        if pending_key.is_some() {
            return Err(Error::Decode("Dictionary entry is missing its value".to_string()));
        }
        Ok(object)
    }
}

/// Codec for single-dimensional arrays, holding `Shared<Vec<Object>>`.
pub struct ArrayCodec {
    ty: Type,
    element: Type,
}

impl ArrayCodec {
    pub fn new(element: &Type) -> Self {
        Self {
            ty: Type::array(element, 1),
            element: element.clone(),
        }
    }
}

impl FieldCodec<Object> for ArrayCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &Object,
    ) -> Result<()> {
        if !write_prologue(writer, session, field_id_delta, expected, &self.ty, value)? {
            return Ok(());
        }
        let shared = value
            .downcast_shared::<Vec<Object>>()
            .ok_or_else(|| mismatch(self.ty.clone(), value))?;
        let codec = session.provider().object_codec(&self.element)?;
        let items = shared.read();
        write_length(writer, session, LENGTH_FIELD, items.len())?;
        write_elements(writer, session, &codec, &self.element, items.iter(), ELEMENTS_FIELD)?;
        write_end_object(writer);
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<Object> {
        let id = match read_prologue(reader, session, field, &self.ty)? {
            Prologue::Done(object) => return Ok(object),
            Prologue::Build(id) => id,
        };
        let items = Shared::new(Vec::new());
        let object = Object::from_shared(self.ty.clone(), items.clone());
        session.references_mut().record_object_at(id, object.clone());

        let codec = session.provider().object_codec(&self.element)?;
        let mut len = None;
        let mut fields = FieldCursor::new();
        while let Some((field_id, field)) = fields.next(reader, session)? {
            match field_id {
                LENGTH_FIELD => {
                    let n = read_length(reader, session, &field)?;
                    items.write().reserve(n.min(reader.remaining()));
                    len = Some(n);
                }
                ELEMENTS_FIELD => {
                    let item = codec.read_value(reader, session, &field)?;
                    items.write().push(item);
                }
                _ => consume_unknown_field(reader, session, &field)?,
            }
        }
        let read = items.read().len();
        if len.is_some_and(|n| n != read) {
            return Err(Error::Decode(format!(
                "Array declared {} elements, read {}",
                len.unwrap_or_default(),
                read
            )));
        }
        trace!(reference = id, len = read, "read array");
        Ok(object)
    }
}

/// Codec for arrays of rank 2 and above, holding `Shared<MultiDimensionalArray>`.
pub struct MultiDimensionalArrayCodec {
    ty: Type,
    element: Type,
    rank: usize,
}

impl MultiDimensionalArrayCodec {
    pub fn new(element: &Type, rank: usize) -> Self {
        Self {
            ty: Type::array(element, rank),
            element: element.clone(),
            rank,
        }
    }
}

impl FieldCodec<Object> for MultiDimensionalArrayCodec {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &Object,
    ) -> Result<()> {
        if !write_prologue(writer, session, field_id_delta, expected, &self.ty, value)? {
            return Ok(());
        }
        let shared = value
            .downcast_shared::<MultiDimensionalArray>()
            .ok_or_else(|| mismatch(self.ty.clone(), value))?;
        let codec = session.provider().object_codec(&self.element)?;
        let array = shared.read();
        if array.dimensions.len() != self.rank {
            return Err(mismatch(self.ty.clone(), value));
        }
        for &dimension in &array.dimensions {
            write_length(writer, session, LENGTH_FIELD, dimension)?;
        }
        write_elements(writer, session, &codec, &self.element, array.items.iter(), ELEMENTS_FIELD)?;
        write_end_object(writer);
        Ok(())
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<Object> {
        let id = match read_prologue(reader, session, field, &self.ty)? {
            Prologue::Done(object) => return Ok(object),
            Prologue::Build(id) => id,
        };
        let array = Shared::new(MultiDimensionalArray::default());
        let object = Object::from_shared(self.ty.clone(), array.clone());
        session.references_mut().record_object_at(id, object.clone());

        let codec = session.provider().object_codec(&self.element)?;
        let mut fields = FieldCursor::new();
        while let Some((field_id, field)) = fields.next(reader, session)? {
            match field_id {
                LENGTH_FIELD => {
                    let dimension = read_length(reader, session, &field)?;
                    array.write().dimensions.push(dimension);
                }
                ELEMENTS_FIELD => {
                    let item = codec.read_value(reader, session, &field)?;
                    array.write().items.push(item);
                }
                _ => consume_unknown_field(reader, session, &field)?,
            }
        }
        {
            let array = array.read();
            let expected = element_count(&array.dimensions)?;
            if array.dimensions.len() != self.rank || expected != array.items.len() {
                return Err(Error::Decode(format!(
                    "Array of dimensions {:?} holds {} items",
                    array.dimensions,
                    array.items.len()
                )));
            }
        }
        Ok(object)
    }
}
