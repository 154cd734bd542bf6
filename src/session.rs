//! Per-operation serialization state.
//!
//! A [`Session`] lives for exactly one serialize or deserialize call. It tracks:
//!
//! - previously seen objects, so repeated and cyclic references are written once
//! - previously seen non-well-known types, so a type name is written once per call
//! - the shared well-known type table and the type-name codec
//!
//! Sessions are pooled by [`SessionPool`]; a [`PooledSession`] resets its session and returns
//! it to the pool when dropped, on every exit path.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::buffer::{Reader, Writer};
use crate::codec::Object;
use crate::provider::CodecProvider;
use crate::tag::Field;
use crate::types::{well_known_types, CarriedType, Type, TypeResolver, WellKnownTypes};
use crate::{Error, Result};

/// Placeholder left in the reference table for a field that was skipped.
///
/// `position` is the offset of the field's value, just after its header, so the value can be
/// read later if something references it.
#[derive(Clone, Debug)]
pub struct UnknownFieldMarker {
    pub field: Field,
    pub position: usize,
}

/// What a reference id currently stands for.
#[derive(Clone, Debug)]
pub enum ReferenceSlot {
    /// Not yet assigned (the counter was rewound past it).
    Vacant,
    /// Consumed by a value field; nothing can refer to it.
    Value,
    /// Reserved for an object that is still being constructed.
    Reserved,
    Object(Object),
    UnknownField(UnknownFieldMarker),
}

/// Outcome of [`ReferencedObjects::get_or_add_reference`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceLookup {
    /// The value is null (reference 0).
    Null,
    /// The value was already written under this id.
    Existing(u32),
    /// The value is new and was assigned this id; its body must be written.
    Added(u32),
}

/// Arena of reference ids for one operation.
///
/// Every field consumes exactly one id, in stream order, on both the writing and the reading
/// side. Id 0 is reserved for null, so slot `n - 1` holds id `n`.
#[derive(Debug, Default)]
pub struct ReferencedObjects {
    current: u32,
    slots: Vec<ReferenceSlot>,
    identities: HashMap<usize, u32>,
}

impl ReferencedObjects {
    /// The id most recently handed out.
    pub fn current_reference_id(&self) -> u32 {
        self.current
    }

    /// Rewinds or advances the counter; the next field is assigned `id + 1`.
    pub fn set_current_reference_id(&mut self, id: u32) {
        self.current = id;
    }

    fn next_id(&mut self) -> u32 {
        self.current += 1;
        self.current
    }

    fn set_slot(&mut self, id: u32, slot: ReferenceSlot) {
        let index = (id - 1) as usize;
        if self.slots.len() <= index {
            self.slots.resize(index + 1, ReferenceSlot::Vacant);
        }
        self.slots[index] = slot;
    }

    /// Consumes an id for a value about to be written and reports whether it was seen before.
    pub fn get_or_add_reference(&mut self, value: &Object) -> ReferenceLookup {
        let next = self.next_id();
        let Some(identity) = value.identity() else {
            self.set_slot(next, ReferenceSlot::Value);
            return ReferenceLookup::Null;
        };
        if let Some(&existing) = self.identities.get(&identity) {
            self.set_slot(next, ReferenceSlot::Value);
            return ReferenceLookup::Existing(existing);
        }
        self.identities.insert(identity, next);
        self.set_slot(next, ReferenceSlot::Object(value.clone()));
        ReferenceLookup::Added(next)
    }

    /// Consumes an id for a field that can never be the target of a reference.
    pub fn mark_value_field(&mut self) {
        let next = self.next_id();
        self.set_slot(next, ReferenceSlot::Value);
    }

    /// Reserves an id for an object that is about to be constructed.
    pub fn create_record_placeholder(&mut self) -> u32 {
        let next = self.next_id();
        self.set_slot(next, ReferenceSlot::Reserved);
        next
    }

    /// Consumes the next id for a fully read object.
    pub fn record_object(&mut self, value: Object) -> u32 {
        let next = self.next_id();
        self.record_object_at(next, value);
        next
    }

    /// Binds `value` to a previously reserved id.
    pub fn record_object_at(&mut self, id: u32, value: Object) {
        if let Some(identity) = value.identity() {
            self.identities.insert(identity, id);
        }
        self.set_slot(id, ReferenceSlot::Object(value));
    }

    /// Consumes the next id for a skipped field.
    pub fn record_unknown_field(&mut self, marker: UnknownFieldMarker) -> u32 {
        let next = self.next_id();
        self.set_slot(next, ReferenceSlot::UnknownField(marker));
        next
    }

    pub fn get(&self, id: u32) -> Option<&ReferenceSlot> {
        id.checked_sub(1).and_then(|index| self.slots.get(index as usize))
    }

    /// Id under which `value` was recorded, if any.
    pub fn reference_of(&self, value: &Object) -> Option<u32> {
        value.identity().and_then(|identity| self.identities.get(&identity).copied())
    }

    /// Known object references, for diagnostics.
    pub fn snapshot(&self) -> Vec<(u32, String)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let description = match slot {
                    ReferenceSlot::Object(object) => format!("{:?}", object),
                    ReferenceSlot::UnknownField(marker) => {
                        format!("unknown field at {}", marker.position)
                    }
                    ReferenceSlot::Reserved => "reserved".to_string(),
                    ReferenceSlot::Vacant | ReferenceSlot::Value => return None,
                };
                Some((index as u32 + 1, description))
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.current = 0;
        self.slots.clear();
        self.identities.clear();
    }
}

/// Session-local table of types written or read by name.
///
/// Names the reader could not resolve still take an id, so later `Referenced` ids line up.
#[derive(Debug, Default)]
pub struct ReferencedTypes {
    current: u32,
    by_id: HashMap<u32, CarriedType>,
    by_type: HashMap<Type, u32>,
}

impl ReferencedTypes {
    /// Records `ty` under the next id unless it is already known.
    pub fn record(&mut self, ty: Type) -> u32 {
        if let Some(&id) = self.by_type.get(&ty) {
            return id;
        }
        self.current += 1;
        self.by_id.insert(self.current, CarriedType::Resolved(ty.clone()));
        self.by_type.insert(ty, self.current);
        self.current
    }

    /// Records a type read from a stream, resolved or not.
    pub fn record_carried(&mut self, carried: CarriedType) -> u32 {
        match carried {
            CarriedType::Resolved(ty) => self.record(ty),
            unresolved => {
                self.current += 1;
                self.by_id.insert(self.current, unresolved);
                self.current
            }
        }
    }

    pub fn get(&self, id: u32) -> Option<&CarriedType> {
        self.by_id.get(&id)
    }

    pub fn id_of(&self, ty: &Type) -> Option<u32> {
        self.by_type.get(ty).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn reset(&mut self) {
        self.current = 0;
        self.by_id.clear();
        self.by_type.clear();
    }
}

/// Writes and reads type names for the `Encoded` schema type.
pub struct TypeCodec {
    resolver: TypeResolver,
    encoded: DashMap<Type, Bytes>,
}

impl TypeCodec {
    pub fn new(resolver: TypeResolver) -> Self {
        Self {
            resolver,
            encoded: DashMap::new(),
        }
    }

    pub fn resolver(&self) -> &TypeResolver {
        &self.resolver
    }

    /// Writes the UTF-8 name of `ty`, length-prefixed.
    pub fn write_encoded_type(&self, writer: &mut Writer, ty: &Type) {
        let encoded = match self.encoded.get(ty) {
            Some(encoded) => encoded.clone(),
            None => {
                let encoded = Bytes::copy_from_slice(ty.name().as_bytes());
                self.encoded.insert(ty.clone(), encoded.clone());
                encoded
            }
        };
        writer.write_length_prefixed(&encoded);
    }

    /// Reads a type name and resolves it through the type filters.
    ///
    /// Unknown and rejected names come back as [`CarriedType::Unresolved`]; only malformed
    /// input is an error here.
    pub fn read_encoded_type(&self, reader: &mut Reader) -> Result<CarriedType> {
        let encoded = reader.read_length_prefixed()?;
        let name = std::str::from_utf8(&encoded)
            .map_err(|e| Error::Decode(format!("Invalid type name: {}", e)))?;
        match self.resolver.resolve(name) {
            Ok(ty) => Ok(CarriedType::Resolved(ty)),
            Err(Error::UnknownTypeName { name }) => Ok(CarriedType::Unresolved {
                name,
                rejected: false,
            }),
            Err(Error::TypeNotAllowed { name }) => Ok(CarriedType::Unresolved {
                name,
                rejected: true,
            }),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for TypeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeCodec")
            .field("encoded", &self.encoded.len())
            .finish_non_exhaustive()
    }
}

/// State for one serialize or deserialize operation.
///
/// A session belongs to a single in-flight call and is not shared between threads.
pub struct Session {
    provider: Arc<CodecProvider>,
    references: ReferencedObjects,
    referenced_types: ReferencedTypes,
}

impl Session {
    pub fn new(provider: Arc<CodecProvider>) -> Self {
        Self {
            provider,
            references: ReferencedObjects::default(),
            referenced_types: ReferencedTypes::default(),
        }
    }

    /// The provider used to resolve codecs for runtime types met mid-stream.
    #[inline]
    pub fn provider(&self) -> &Arc<CodecProvider> {
        &self.provider
    }

    #[inline]
    pub fn references(&self) -> &ReferencedObjects {
        &self.references
    }

    #[inline]
    pub fn references_mut(&mut self) -> &mut ReferencedObjects {
        &mut self.references
    }

    #[inline]
    pub fn referenced_types(&self) -> &ReferencedTypes {
        &self.referenced_types
    }

    #[inline]
    pub fn referenced_types_mut(&mut self) -> &mut ReferencedTypes {
        &mut self.referenced_types
    }

    #[inline]
    pub fn well_known_types(&self) -> &'static WellKnownTypes {
        well_known_types()
    }

    #[inline]
    pub fn type_codec(&self) -> &TypeCodec {
        self.provider.type_codec()
    }

    /// Clears the reference and type tables. The well-known table is shared and untouched.
    pub fn reset(&mut self) {
        self.references.reset();
        self.referenced_types.reset();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("references", &self.references.current_reference_id())
            .field("referenced_types", &self.referenced_types.len())
            .finish_non_exhaustive()
    }
}

/// Pool of reusable sessions bound to one provider.
pub struct SessionPool {
    provider: Arc<CodecProvider>,
    sessions: Mutex<Vec<Session>>,
    max_retained: usize,
}

impl SessionPool {
    const DEFAULT_MAX_RETAINED: usize = 32;

    pub fn new(provider: Arc<CodecProvider>) -> Self {
        Self {
            provider,
            sessions: Mutex::new(Vec::new()),
            max_retained: Self::DEFAULT_MAX_RETAINED,
        }
    }

    pub fn with_max_retained(mut self, max_retained: usize) -> Self {
        self.max_retained = max_retained;
        self
    }

    /// Acquires a clean session. It returns to the pool when the guard drops.
    pub fn get(&self) -> PooledSession<'_> {
        let session = self
            .sessions
            .lock()
            .pop()
            .unwrap_or_else(|| Session::new(self.provider.clone()));
        PooledSession {
            pool: self,
            session: Some(session),
        }
    }

    /// Number of idle sessions.
    pub fn idle(&self) -> usize {
        self.sessions.lock().len()
    }

    fn release(&self, mut session: Session) {
        session.reset();
        let mut sessions = self.sessions.lock();
        if sessions.len() < self.max_retained {
            sessions.push(session);
        } else {
            trace!("session pool full, dropping session");
        }
    }
}

/// A session on loan from a [`SessionPool`].
pub struct PooledSession<'a> {
    pool: &'a SessionPool,
    session: Option<Session>,
}

impl Deref for PooledSession<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session.as_ref().expect("session is present until drop")
    }
}

impl DerefMut for PooledSession<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session.as_mut().expect("session is present until drop")
    }
}

impl Drop for PooledSession<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }
}
