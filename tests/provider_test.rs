mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::*;
use senax_wire::codec::{Described, PartialSerializer};
use senax_wire::core::IntegerCodec;
use senax_wire::collections::{
    dictionary_definition, dictionary_of, list_definition, list_of, new_dictionary, new_list,
    MultiDimensionalArray,
};
use senax_wire::provider::GeneralizedCodec;
use senax_wire::skip::consume_unknown_field;
use senax_wire::tag::{read_field_header, write_end_object, write_field_header_expected};
use senax_wire::{
    CodecProvider, Error, FieldCodec, FieldCursor, Object, ObjectValue, Reader, Result, Serializer,
    Session, Shared, Type, TypeKind, WireType, Writer,
};

fn round_trip<T: ObjectValue>(serializer: &Serializer, value: &T) -> T {
    let bytes = serializer.serialize(value).unwrap();
    serializer.deserialize(bytes).unwrap()
}

#[test]
fn test_primitive_round_trips() {
    let serializer = Serializer::new(CodecProvider::builder().build());
    assert!(round_trip(&serializer, &true));
    assert!(!round_trip(&serializer, &false));
    assert_eq!(round_trip(&serializer, &i8::MIN), i8::MIN);
    assert_eq!(round_trip(&serializer, &i16::MAX), i16::MAX);
    assert_eq!(round_trip(&serializer, &-1i32), -1);
    assert_eq!(round_trip(&serializer, &i64::MIN), i64::MIN);
    assert_eq!(round_trip(&serializer, &u8::MAX), u8::MAX);
    assert_eq!(round_trip(&serializer, &u16::MAX), u16::MAX);
    assert_eq!(round_trip(&serializer, &u32::MAX), u32::MAX);
    assert_eq!(round_trip(&serializer, &u64::MAX), u64::MAX);
    assert_eq!(round_trip(&serializer, &1.5f32), 1.5);
    assert_eq!(round_trip(&serializer, &-2.25f64), -2.25);
    assert!(round_trip(&serializer, &f64::NAN).is_nan());
    assert_eq!(round_trip(&serializer, &'界'), '界');
    assert_eq!(round_trip(&serializer, &String::from("héllo")), "héllo");
    assert_eq!(round_trip(&serializer, &String::new()), "");
    assert_eq!(
        round_trip(&serializer, &Bytes::from_static(b"\x00\x01\x02")),
        Bytes::from_static(b"\x00\x01\x02")
    );
    let duration = Duration::new(90_061, 500);
    assert_eq!(round_trip(&serializer, &duration), duration);
}

#[test]
fn test_integer_cross_width_reads() {
    let serializer = Serializer::new(CodecProvider::builder().build());

    // Narrow values widen
    let bytes = serializer.serialize(&-5i8).unwrap();
    assert_eq!(serializer.deserialize::<i64>(bytes).unwrap(), -5);
    let bytes = serializer.serialize(&200u8).unwrap();
    assert_eq!(serializer.deserialize::<u64>(bytes).unwrap(), 200);

    // Wide values narrow when in range
    let bytes = serializer.serialize(&100i64).unwrap();
    assert_eq!(serializer.deserialize::<i8>(bytes).unwrap(), 100);

    // ...and fail when not
    let bytes = serializer.serialize(&300i64).unwrap();
    let err = serializer.deserialize::<i8>(bytes).unwrap_err();
    assert!(matches!(err, Error::Decode(ref msg) if msg == "Value 300 too large for i8"));

    let bytes = serializer.serialize(&u64::MAX).unwrap();
    assert!(matches!(serializer.deserialize::<u32>(bytes), Err(Error::Decode(_))));

    // f32 widens to f64
    let bytes = serializer.serialize(&0.5f32).unwrap();
    assert_eq!(serializer.deserialize::<f64>(bytes).unwrap(), 0.5);
    let bytes = serializer.serialize(&1e300f64).unwrap();
    assert!(matches!(serializer.deserialize::<f32>(bytes), Err(Error::Decode(_))));
}

#[test]
fn test_wrong_wire_type_is_rejected() {
    let serializer = Serializer::new(CodecProvider::builder().build());
    let bytes = serializer.serialize(&String::from("x")).unwrap();
    let err = serializer.deserialize::<i32>(bytes).unwrap_err();
    assert!(matches!(err, Error::UnsupportedWireType { context: "integer", .. }));
}

#[test]
fn test_primitives_through_object_fields() {
    let serializer = Serializer::new(CodecProvider::builder().build());
    let values = vec![
        7i32.into_object(),
        String::from("seven").into_object(),
        Object::null(),
        7.0f64.into_object(),
        Duration::from_millis(7).into_object(),
    ];
    let decoded: Vec<Object> = round_trip(&serializer, &values);
    assert_eq!(i32::from_object(decoded[0].clone()).unwrap(), 7);
    assert_eq!(String::from_object(decoded[1].clone()).unwrap(), "seven");
    assert!(decoded[2].is_null());
    assert_eq!(f64::from_object(decoded[3].clone()).unwrap(), 7.0);
    assert_eq!(Duration::from_object(decoded[4].clone()).unwrap(), Duration::from_millis(7));
    assert!(matches!(
        i64::from_object(decoded[0].clone()),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn test_vec_maps_to_array() {
    let serializer = Serializer::new(CodecProvider::builder().build());
    let values = vec![1i32, -2, 3, i32::MAX];
    assert_eq!(round_trip(&serializer, &values), values);
    assert_eq!(round_trip(&serializer, &Vec::<String>::new()), Vec::<String>::new());

    let nested = vec![vec![1u16], vec![], vec![2, 3]];
    assert_eq!(round_trip(&serializer, &nested), nested);
}

#[test]
fn test_multi_dimensional_array() {
    let serializer = Serializer::new(CodecProvider::builder().build());
    let items = (0..6).map(|i| (i as i64).into_object()).collect();
    let array = MultiDimensionalArray::new(vec![2, 3], items).unwrap();
    let object = array.into_object(&Type::int64());
    assert_eq!(object.runtime_type().unwrap().name(), "i64[,]");

    let decoded: Object = round_trip(&serializer, &object);
    let decoded = decoded.downcast_shared::<MultiDimensionalArray>().unwrap();
    let decoded = decoded.read();
    assert_eq!(decoded.dimensions, vec![2, 3]);
    let values: Vec<i64> = decoded
        .items
        .iter()
        .map(|item| i64::from_object(item.clone()).unwrap())
        .collect();
    assert_eq!(values, vec![0, 1, 2, 3, 4, 5]);

    assert!(MultiDimensionalArray::new(vec![2, 2], Vec::new()).is_err());
}

#[test]
fn test_multi_dimensional_array_size_overflow() {
    let provider = CodecProvider::builder().build();
    let ty = Type::array(&Type::int32(), 3);

    // Three dimensions of u32::MAX and no elements
    let mut session = Session::new(provider.clone());
    let mut writer = Writer::new();
    write_field_header_expected(&mut writer, 0, WireType::TagDelimited);
    for _ in 0..3 {
        IntegerCodec::<u32>::new()
            .write_field(&mut writer, &mut session, 0, &Type::uint32(), &u32::MAX)
            .unwrap();
    }
    write_end_object(&mut writer);

    let mut session = Session::new(provider.clone());
    let mut reader = Reader::from(writer);
    let field = read_field_header(&mut reader, &mut session).unwrap();
    let codec = provider.object_codec(&ty).unwrap();
    let err = codec.read_value(&mut reader, &mut session, &field).unwrap_err();
    assert!(matches!(err, Error::Decode(ref msg) if msg.contains("overflow")));

    assert!(MultiDimensionalArray::new(vec![usize::MAX, 2], Vec::new()).is_err());
}

#[test]
fn test_generic_list_and_dictionary() {
    let serializer = Serializer::new(CodecProvider::builder().build());

    let list = new_list(
        &Type::string(),
        vec!["a".to_string().into_object(), "b".to_string().into_object()],
    );
    let decoded: Object = round_trip(&serializer, &list);
    assert_eq!(decoded.runtime_type(), Some(&list_of(&Type::string())));
    let items = decoded.downcast_shared::<Vec<Object>>().unwrap();
    let items: Vec<String> = items
        .read()
        .iter()
        .map(|item| String::from_object(item.clone()).unwrap())
        .collect();
    assert_eq!(items, vec!["a", "b"]);

    let dictionary = new_dictionary(
        &Type::string(),
        &Type::int32(),
        vec![
            ("one".to_string().into_object(), 1i32.into_object()),
            ("two".to_string().into_object(), 2i32.into_object()),
        ],
    );
    let decoded: Object = round_trip(&serializer, &dictionary);
    assert_eq!(decoded.runtime_type(), Some(&dictionary_of(&Type::string(), &Type::int32())));
    let entries = decoded.downcast_shared::<Vec<(Object, Object)>>().unwrap();
    let entries = entries.read();
    assert_eq!(entries.len(), 2);
    assert_eq!(String::from_object(entries[1].0.clone()).unwrap(), "two");
    assert_eq!(i32::from_object(entries[1].1.clone()).unwrap(), 2);
}

#[test]
fn test_shared_list_keeps_identity() {
    let serializer = Serializer::new(CodecProvider::builder().build());
    let inner = new_list(&Type::int32(), vec![1i32.into_object()]);
    let outer = new_list(&Type::object(), vec![inner.clone(), inner]);

    let decoded: Object = round_trip(&serializer, &outer);
    let items = decoded.downcast_shared::<Vec<Object>>().unwrap();
    let items = items.read();
    assert!(items[0].ptr_eq(&items[1]));
    assert!(!items[0].is_null());
}

#[test]
fn test_unsupported_shapes_are_rejected() {
    let provider = CodecProvider::builder().build();

    let err = provider.object_codec(&list_definition()).err().unwrap();
    assert!(matches!(err, Error::UnsupportedType { .. }));
    let err = provider.object_codec(&Type::pointer(&Type::int32())).err().unwrap();
    assert!(matches!(err, Error::UnsupportedType { reason: "pointer type", .. }));
    let err = provider.object_codec(&Type::by_ref(&Type::string())).err().unwrap();
    assert!(matches!(err, Error::UnsupportedType { reason: "by-ref type", .. }));

    // Constructions are checked against the definition's arity
    assert!(Type::constructed(&dictionary_definition(), vec![Type::int32()]).is_err());
}

#[test]
fn test_codec_not_found_names_the_type() {
    let provider = CodecProvider::builder().build();
    let unknown = Type::class("Unregistered");
    let err = provider.object_codec(&unknown).err().unwrap();
    match err {
        Error::CodecNotFound { ty } => assert_eq!(ty.name(), "Unregistered"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(provider.try_object_codec(&unknown).unwrap().is_none());

    let err = provider.codec::<Option<Shared<Node>>>().err().unwrap();
    assert!(matches!(err, Error::CodecNotFound { .. }));
    let err = provider.partial_serializer::<Node>().err().unwrap();
    assert!(matches!(err, Error::SerializerNotFound { .. }));
}

fn shape() -> Type {
    Type::interface("Shape")
}

#[derive(Debug, Default)]
struct Circle {
    radius: i32,
}

impl Described for Circle {
    fn described_type() -> Type {
        Type::class("Circle").implementing(&[shape()])
    }
}

struct CircleSerializer;

impl PartialSerializer<Circle> for CircleSerializer {
    fn serialize(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        instance: &Circle,
    ) -> Result<()> {
        IntegerCodec::<i32>::new().write_field(writer, session, 0, &Type::int32(), &instance.radius)
    }

    fn deserialize(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        instance: &mut Circle,
    ) -> Result<()> {
        let mut fields = FieldCursor::new();
        while let Some((id, field)) = fields.next(reader, session)? {
            match id {
                0 => {
                    let codec = IntegerCodec::<i32>::new();
                    instance.radius = codec.read_value(reader, session, &field)?;
                }
                _ => consume_unknown_field(reader, session, &field)?,
            }
        }
        Ok(())
    }
}

#[test]
fn test_abstract_types_resolve_to_proxy() {
    let provider = CodecProvider::builder()
        .add_type(shape())
        .add_default_serializer::<Circle>(CircleSerializer)
        .build();
    assert!(provider.is_supported(&shape()));
    assert!(provider.is_supported(&Type::object()));
    assert!(provider.is_supported(&Type::abstract_class("Base", None)));
    assert!(shape().is_assignable_from(&Circle::described_type()));

    // A field declared as an interface carries the concrete type
    let serializer = Serializer::new(provider.clone());
    let value = Object::from_shared(Circle::described_type(), Shared::new(Circle { radius: 3 }));
    let list = new_list(&shape(), vec![value]);
    let decoded: Object = round_trip(&serializer, &list);
    let items = decoded.downcast_shared::<Vec<Object>>().unwrap();
    let first = items.read()[0].clone();
    assert_eq!(first.runtime_type(), Some(&Circle::described_type()));
    assert_eq!(first.downcast_shared::<Circle>().unwrap().read().radius, 3);
}

#[test]
fn test_carried_type_must_fit_declared_type() {
    let serializer = Serializer::new(provider());

    // A subtype fits a field of its base type
    let sub = SubType {
        base: BaseType {
            base_type_string: "b".to_string(),
        },
        string: "s".to_string(),
        int: 1,
    };
    let value = Object::from_shared(SubType::described_type(), Shared::new(sub));
    let list = new_list(&BaseType::described_type(), vec![value]);
    let decoded: Object = round_trip(&serializer, &list);
    let items = decoded.downcast_shared::<Vec<Object>>().unwrap();
    assert_eq!(items.read()[0].runtime_type(), Some(&SubType::described_type()));

    // An unrelated type does not
    let stray = Object::from_shared(Node::described_type(), node("stray"));
    let list = new_list(&BaseType::described_type(), vec![stray]);
    let bytes = serializer.serialize(&list).unwrap();
    let err = serializer.deserialize::<Object>(bytes).unwrap_err();
    match err {
        Error::TypeMismatch { expected, actual } => {
            assert_eq!(expected, BaseType::described_type());
            assert_eq!(actual, "Node");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_type_filter_rejects_encoded_names() {
    let writer = Serializer::new(provider());
    let reader = Serializer::new(
        CodecProvider::builder()
            .add_default_serializer::<Node>(NodeSerializer)
            .add_type_filter(|ty: &Type| (ty.name() == "Node").then_some(false))
            .build(),
    );

    let value = Object::from_shared(Node::described_type(), node("blocked"));
    let bytes = writer.serialize(&value).unwrap();
    let err = reader.deserialize::<Object>(bytes).unwrap_err();
    assert!(matches!(err, Error::TypeNotAllowed { ref name } if name == "Node"));

    // Filters also apply to type arguments
    let bytes = writer.serialize(&new_list(&Node::described_type(), Vec::new())).unwrap();
    let err = reader.deserialize::<Object>(bytes).unwrap_err();
    assert!(matches!(err, Error::TypeNotAllowed { .. }));
}

struct Celsius;

impl GeneralizedCodec for Celsius {
    fn is_supported_type(&self, ty: &Type) -> bool {
        ty.name() == "Celsius"
    }

    fn codec_for(&self, _ty: &Type) -> Arc<dyn FieldCodec<Object>> {
        let provider = CodecProvider::builder().build();
        provider.object_codec(&Type::float64()).unwrap()
    }
}

#[test]
fn test_generalized_source_is_consulted() {
    let celsius = Type::value("Celsius");
    let provider = CodecProvider::builder()
        .add_type(celsius.clone())
        .add_generalized_source(|| vec![Arc::new(Celsius) as Arc<dyn GeneralizedCodec>])
        .build();
    assert!(provider.is_supported(&celsius));
    assert!(!provider.is_supported(&Type::value("Fahrenheit")));
}

#[test]
fn test_adapted_codecs_are_cached() {
    let provider = CodecProvider::builder().build();
    let first = provider.codec::<Vec<i32>>().unwrap();
    let second = provider.codec::<Vec<i32>>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let first = provider.object_codec(&Type::array(&Type::int32(), 1)).unwrap();
    let second = provider.object_codec(&Type::array(&Type::int32(), 1)).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_concurrent_first_use_is_deterministic() {
    let provider = provider();
    let serializer = Arc::new(Serializer::new(provider));
    let value = Some(Shared::new(SubType {
        base: BaseType {
            base_type_string: "base".to_string(),
        },
        string: "sub".to_string(),
        int: 2,
    }));

    let outputs: Vec<Bytes> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let serializer = serializer.clone();
                let value = value.clone();
                scope.spawn(move || {
                    let list = vec![1u32, 2, 3];
                    serializer.serialize(&list).unwrap();
                    serializer.serialize(&value).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    for output in &outputs[1..] {
        assert_eq!(output, &outputs[0]);
    }
    let decoded: Option<Shared<SubType>> = serializer.deserialize(outputs[0].clone()).unwrap();
    assert_eq!(decoded.unwrap().read().int, 2);
}

#[test]
fn test_list_definition_shape() {
    let definition = list_definition();
    assert!(matches!(definition.kind(), TypeKind::GenericDefinition { arity: 1, .. }));
    let ints = list_of(&Type::int32());
    assert_eq!(ints.name(), "List<i32>");
    assert_eq!(ints.generic_arguments(), &[Type::int32()]);

    let provider = CodecProvider::builder().build();
    let resolved = provider
        .type_codec()
        .resolver()
        .resolve("Dictionary<string,List<i32[]>>")
        .unwrap();
    assert_eq!(
        resolved,
        dictionary_of(&Type::string(), &list_of(&Type::array(&Type::int32(), 1)))
    );
}

#[cfg(feature = "uuid")]
#[test]
fn test_guid_round_trip() {
    let serializer = Serializer::new(CodecProvider::builder().build());
    let id = uuid::Uuid::from_u128(0x0123_4567_89ab_cdef_fedc_ba98_7654_3210);
    assert_eq!(round_trip(&serializer, &id), id);
}

#[cfg(feature = "chrono")]
#[test]
fn test_datetime_round_trip() {
    let serializer = Serializer::new(CodecProvider::builder().build());
    let now = chrono::DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
    assert_eq!(round_trip(&serializer, &now), now);
    let before_epoch = chrono::DateTime::from_timestamp(-86_400, 5).unwrap();
    assert_eq!(round_trip(&serializer, &before_epoch), before_epoch);
}

#[cfg(feature = "rust_decimal")]
#[test]
fn test_decimal_round_trip() {
    use std::str::FromStr;

    let serializer = Serializer::new(CodecProvider::builder().build());
    let value = rust_decimal::Decimal::from_str("-12345.6789").unwrap();
    assert_eq!(round_trip(&serializer, &value), value);
}
