//! Model types and hand-written partial serializers shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use senax_wire::codec::{Described, PartialSerializer};
use senax_wire::core::{IntegerCodec, StringCodec};
use senax_wire::skip::consume_unknown_field;
use senax_wire::tag::write_end_base;
use senax_wire::{
    CodecProvider, FieldCodec, FieldCursor, Reader, Result, Session, Shared, Type, Writer,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// --- BaseType / SubType ---

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BaseType {
    pub base_type_string: String,
}

impl Described for BaseType {
    fn described_type() -> Type {
        Type::class("BaseType")
    }
}

pub struct BaseTypeSerializer;

impl PartialSerializer<BaseType> for BaseTypeSerializer {
    fn serialize(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        instance: &BaseType,
    ) -> Result<()> {
        StringCodec.write_field(writer, session, 0, &Type::string(), &instance.base_type_string)
    }

    fn deserialize(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        instance: &mut BaseType,
    ) -> Result<()> {
        let mut fields = FieldCursor::new();
        while let Some((id, field)) = fields.next(reader, session)? {
            match id {
                0 => instance.base_type_string = StringCodec.read_value(reader, session, &field)?,
                _ => consume_unknown_field(reader, session, &field)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SubType {
    pub base: BaseType,
    pub string: String,
    pub int: i32,
}

impl Described for SubType {
    fn described_type() -> Type {
        Type::derived("SubType", &BaseType::described_type())
    }
}

/// Delegates to the base serializer, then writes its own fields after an end-of-base marker.
pub struct SubTypeSerializer;

impl PartialSerializer<SubType> for SubTypeSerializer {
    fn serialize(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        instance: &SubType,
    ) -> Result<()> {
        let base = session.provider().partial_serializer::<BaseType>()?;
        base.serialize(writer, session, &instance.base)?;
        write_end_base(writer);
        StringCodec.write_field(writer, session, 0, &Type::string(), &instance.string)?;
        IntegerCodec::<i32>::new().write_field(writer, session, 1, &Type::int32(), &instance.int)
    }

    fn deserialize(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        instance: &mut SubType,
    ) -> Result<()> {
        let base = session.provider().partial_serializer::<BaseType>()?;
        base.deserialize(reader, session, &mut instance.base)?;
        let mut fields = FieldCursor::new();
        while let Some((id, field)) = fields.next(reader, session)? {
            match id {
                0 => instance.string = StringCodec.read_value(reader, session, &field)?,
                1 => instance.int = IntegerCodec::<i32>::new().read_value(reader, session, &field)?,
                _ => consume_unknown_field(reader, session, &field)?,
            }
        }
        Ok(())
    }
}

// --- Node ---

/// A linked node, used for shared references and cycles.
#[derive(Debug, Default)]
pub struct Node {
    pub name: String,
    pub next: Option<Shared<Node>>,
}

impl Described for Node {
    fn described_type() -> Type {
        Type::class("Node")
    }
}

pub struct NodeSerializer;

impl PartialSerializer<Node> for NodeSerializer {
    fn serialize(&self, writer: &mut Writer, session: &mut Session, instance: &Node) -> Result<()> {
        StringCodec.write_field(writer, session, 0, &Type::string(), &instance.name)?;
        let codec = session.provider().codec::<Option<Shared<Node>>>()?;
        codec.write_field(writer, session, 1, &Node::described_type(), &instance.next)
    }

    fn deserialize(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        instance: &mut Node,
    ) -> Result<()> {
        let mut fields = FieldCursor::new();
        while let Some((id, field)) = fields.next(reader, session)? {
            match id {
                0 => instance.name = StringCodec.read_value(reader, session, &field)?,
                1 => {
                    let codec = session.provider().codec::<Option<Shared<Node>>>()?;
                    instance.next = codec.read_value(reader, session, &field)?;
                }
                _ => consume_unknown_field(reader, session, &field)?,
            }
        }
        Ok(())
    }
}

pub fn node(name: &str) -> Shared<Node> {
    Shared::new(Node {
        name: name.to_string(),
        next: None,
    })
}

// --- Holder, in two versions ---

/// Newer shape: field 0 (`extra`) is unknown to [`HolderV1`].
#[derive(Debug, Default)]
pub struct HolderV2 {
    pub extra: Option<Shared<Node>>,
    pub known: Option<Shared<Node>>,
    pub note: String,
    pub weight: f64,
}

impl Described for HolderV2 {
    fn described_type() -> Type {
        Type::class("Holder")
    }
}

pub struct HolderV2Serializer;

impl PartialSerializer<HolderV2> for HolderV2Serializer {
    fn serialize(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        instance: &HolderV2,
    ) -> Result<()> {
        let nodes = session.provider().codec::<Option<Shared<Node>>>()?;
        nodes.write_field(writer, session, 0, &Node::described_type(), &instance.extra)?;
        nodes.write_field(writer, session, 1, &Node::described_type(), &instance.known)?;
        StringCodec.write_field(writer, session, 1, &Type::string(), &instance.note)?;
        let weights = session.provider().codec::<f64>()?;
        weights.write_field(writer, session, 7, &Type::float64(), &instance.weight)
    }

    fn deserialize(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        instance: &mut HolderV2,
    ) -> Result<()> {
        let nodes = session.provider().codec::<Option<Shared<Node>>>()?;
        let mut fields = FieldCursor::new();
        while let Some((id, field)) = fields.next(reader, session)? {
            match id {
                0 => instance.extra = nodes.read_value(reader, session, &field)?,
                1 => instance.known = nodes.read_value(reader, session, &field)?,
                2 => instance.note = StringCodec.read_value(reader, session, &field)?,
                9 => {
                    let codec = session.provider().codec::<f64>()?;
                    instance.weight = codec.read_value(reader, session, &field)?;
                }
                _ => consume_unknown_field(reader, session, &field)?,
            }
        }
        Ok(())
    }
}

/// Older shape: only knows field 1.
#[derive(Debug, Default)]
pub struct HolderV1 {
    pub known: Option<Shared<Node>>,
}

impl Described for HolderV1 {
    fn described_type() -> Type {
        Type::class("Holder")
    }
}

pub struct HolderV1Serializer;

impl PartialSerializer<HolderV1> for HolderV1Serializer {
    fn serialize(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        instance: &HolderV1,
    ) -> Result<()> {
        let nodes = session.provider().codec::<Option<Shared<Node>>>()?;
        nodes.write_field(writer, session, 1, &Node::described_type(), &instance.known)
    }

    fn deserialize(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        instance: &mut HolderV1,
    ) -> Result<()> {
        let mut fields = FieldCursor::new();
        while let Some((id, field)) = fields.next(reader, session)? {
            match id {
                1 => {
                    let nodes = session.provider().codec::<Option<Shared<Node>>>()?;
                    instance.known = nodes.read_value(reader, session, &field)?;
                }
                _ => consume_unknown_field(reader, session, &field)?,
            }
        }
        Ok(())
    }
}

// --- providers ---

pub fn provider() -> Arc<CodecProvider> {
    CodecProvider::builder()
        .add_default_serializer::<BaseType>(BaseTypeSerializer)
        .add_default_serializer::<SubType>(SubTypeSerializer)
        .add_default_serializer::<Node>(NodeSerializer)
        .add_default_serializer::<HolderV2>(HolderV2Serializer)
        .build()
}

pub fn v1_provider() -> Arc<CodecProvider> {
    CodecProvider::builder()
        .add_default_serializer::<Node>(NodeSerializer)
        .add_default_serializer::<HolderV1>(HolderV1Serializer)
        .build()
}
