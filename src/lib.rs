//! # senax-wire
//!
//! A compact, schema-evolvable binary object serializer with shared-reference and
//! cyclic-graph fidelity.
//!
//! - Every value is preceded by a one-byte [`Tag`](tag::Tag) carrying the wire type, the
//!   schema type and an embedded field-id delta
//! - Composite values are tag-delimited, so fields unknown to a reader are skipped instead of
//!   failing the whole decode
//! - A per-call [`Session`](session::Session) deduplicates objects and types, which makes
//!   shared references and cycles round-trip with their identity intact
//! - A [`CodecProvider`](provider::CodecProvider) resolves runtime types to codecs, bridging
//!   strongly-typed (`FieldCodec<T>`) and type-erased (`FieldCodec<Object>`) calling conventions
//!
//! ## Feature Flags
//!
//! - `uuid`: enables the well-known `guid` codec for `uuid::Uuid`.
//! - `chrono`: enables the well-known `datetime` codec for `chrono::DateTime<Utc>`.
//! - `rust_decimal`: enables the well-known `decimal` codec for `rust_decimal::Decimal`.
//!
//! ## Example
//!
//! ```rust
//! use senax_wire::{provider::CodecProvider, Serializer};
//!
//! let serializer = Serializer::new(CodecProvider::builder().build());
//! let bytes = serializer.serialize(&String::from("hello")).unwrap();
//! let decoded: String = serializer.deserialize(bytes).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

pub mod buffer;
pub mod codec;
pub mod collections;
pub mod core;
mod features;
pub mod object;
pub mod provider;
pub mod reference;
pub mod session;
pub mod skip;
pub mod tag;
pub mod types;
pub mod varint;

use std::sync::Arc;

use bytes::Bytes;

pub use buffer::{BufferPool, Reader, Writer};
pub use codec::{
    Activator, FieldCodec, Object, ObjectValue, PartialSerializer, Shared, ValueSerializer,
};
pub use object::EnumValue;
pub use provider::{CodecProvider, CodecProviderBuilder};
pub use session::{Session, SessionPool};
pub use tag::{Field, FieldCursor, SchemaType, Tag, WireType};
pub use types::{Type, TypeKind};

/// Errors that can occur while writing or reading a serialized stream.
///
/// Every variant is fatal to the current operation. None of them are transient: they indicate
/// either a corrupt stream or a missing registration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A tag accessor was used that the tag's wire type does not support.
    #[error("Malformed header: {accessor} is not valid for tag {tag:?}")]
    MalformedHeader { tag: tag::Tag, accessor: &'static str },
    /// The reader ran out of bytes before the requested count was available.
    #[error("Insufficient data: needed {needed} bytes, {remaining} remaining")]
    InsufficientData { needed: usize, remaining: usize },
    /// A variable-length integer overflowed its target width.
    #[error("Invalid varint")]
    InvalidVarInt,
    /// A codec encountered a wire type it cannot decode or skip.
    #[error("Unsupported wire type {wire_type:?} in {context} (field {field:?})")]
    UnsupportedWireType {
        wire_type: tag::WireType,
        field: Box<tag::Field>,
        context: &'static str,
    },
    /// A reference field points at an id the session has never seen.
    #[error(
        "Reference {reference} not found while reading {expected}. Known references: {known:?}"
    )]
    ReferenceNotFound {
        reference: u32,
        expected: Type,
        known: Vec<(u32, String)>,
    },
    /// No codec could be resolved for the type.
    #[error("Codec not found for type {ty}")]
    CodecNotFound { ty: Type },
    /// No partial serializer is registered for the type.
    #[error("Serializer not found for type {ty}")]
    SerializerNotFound { ty: Type },
    /// The type has a shape the provider refuses to serialize.
    #[error("Unsupported type {ty}: {reason}")]
    UnsupportedType { ty: Type, reason: &'static str },
    /// An encoded type name does not resolve to any known type.
    #[error("Unknown type name: {name}")]
    UnknownTypeName { name: String },
    /// An encoded type name resolved, but a type filter rejected it.
    #[error("Type not allowed: {name}")]
    TypeNotAllowed { name: String },
    /// A type-erased value does not have the shape the typed caller asked for.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: Type, actual: String },
    /// The payload is structurally valid but its content is not.
    #[error("Decode error: {0}")]
    Decode(String),
}

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Entry point bundling a codec provider with a pool of sessions.
///
/// `serialize`/`deserialize` acquire a session for the duration of one call; it is reset and
/// returned to the pool when the call returns, including when it returns an error.
pub struct Serializer {
    provider: Arc<CodecProvider>,
    sessions: SessionPool,
    buffers: Option<Arc<BufferPool>>,
}

impl Serializer {
    pub fn new(provider: Arc<CodecProvider>) -> Self {
        Self {
            sessions: SessionPool::new(provider.clone()),
            provider,
            buffers: None,
        }
    }

    /// Rents writer segments from `pool` instead of allocating them.
    pub fn with_buffer_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.buffers = Some(pool);
        self
    }

    pub fn provider(&self) -> &Arc<CodecProvider> {
        &self.provider
    }

    pub fn sessions(&self) -> &SessionPool {
        &self.sessions
    }

    /// Serializes `value` as a single root field and returns the encoded bytes.
    ///
    /// # Example
    /// ```rust
    /// use senax_wire::{provider::CodecProvider, Serializer};
    ///
    /// let serializer = Serializer::new(CodecProvider::builder().build());
    /// let bytes = serializer.serialize(&-42i64).unwrap();
    /// assert_eq!(serializer.deserialize::<i64>(bytes).unwrap(), -42);
    /// ```
    pub fn serialize<T: ObjectValue>(&self, value: &T) -> Result<Bytes> {
        let mut writer = match &self.buffers {
            Some(pool) => Writer::with_pool(pool.clone()),
            None => Writer::new(),
        };
        self.serialize_into(value, &mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Serializes `value` into an existing writer.
    pub fn serialize_into<T: ObjectValue>(&self, value: &T, writer: &mut Writer) -> Result<()> {
        let codec = self.provider.codec::<T>()?;
        let mut session = self.sessions.get();
        codec.write_field(writer, &mut session, 0, &T::static_type(), value)
    }

    /// Deserializes a single root field of type `T`.
    pub fn deserialize<T: ObjectValue>(&self, input: impl Into<Reader>) -> Result<T> {
        let mut reader = input.into();
        self.deserialize_from(&mut reader)
    }

    /// Deserializes a single root field of type `T`, leaving the reader after it.
    pub fn deserialize_from<T: ObjectValue>(&self, reader: &mut Reader) -> Result<T> {
        let codec = self.provider.codec::<T>()?;
        let mut session = self.sessions.get();
        let field = tag::read_field_header(reader, &mut session)?;
        codec.read_value(reader, &mut session, &field)
    }
}
