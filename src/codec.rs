//! Codec contracts and the type-erased value model.
//!
//! A codec comes in one of two calling conventions:
//!
//! - strongly typed: `FieldCodec<T>` reads and writes `T` directly
//! - type-erased: `FieldCodec<Object>` reads and writes [`Object`], a runtime-typed handle
//!
//! [`ErasedCodec`] and [`TypedCodec`] adapt one convention to the other. Values cross the
//! boundary through [`ObjectValue`].

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::{Reader, Writer};
use crate::reference;
use crate::session::Session;
use crate::tag::Field;
use crate::types::Type;
use crate::{Error, Result};

/// Writes and reads values of one logical type against the wire format.
pub trait FieldCodec<T>: Send + Sync {
    /// Writes a header for `value` followed by its body.
    ///
    /// `field_id_delta` is relative to the previous field of the enclosing object and
    /// `expected` is the statically declared type of the field.
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &T,
    ) -> Result<()>;

    /// Reads the body of a field whose header has already been read.
    fn read_value(&self, reader: &mut Reader, session: &mut Session, field: &Field) -> Result<T>;
}

/// Generated, framing-agnostic code for the declared fields of one type.
///
/// `serialize` writes the fields of `T` (after delegating to the base type's serializer and
/// writing an end-of-base marker, if `T` has a base). `deserialize` populates an already
/// activated instance and returns after consuming the end-of-base or end-of-object marker
/// that ends its segment.
pub trait PartialSerializer<T>: Send + Sync {
    fn serialize(&self, writer: &mut Writer, session: &mut Session, instance: &T) -> Result<()>;

    fn deserialize(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        instance: &mut T,
    ) -> Result<()>;
}

/// Generated code for the fields of a value type. Same contract as [`PartialSerializer`], but
/// the value never takes part in reference tracking.
pub trait ValueSerializer<T>: Send + Sync {
    fn serialize(&self, writer: &mut Writer, session: &mut Session, value: &T) -> Result<()>;

    fn deserialize(&self, reader: &mut Reader, session: &mut Session, value: &mut T) -> Result<()>;
}

/// Constructs instances before their fields are populated.
pub trait Activator<T>: Send + Sync {
    fn create(&self) -> T;
}

/// Activates through [`Default`].
pub struct DefaultActivator<T>(PhantomData<fn() -> T>);

impl<T> DefaultActivator<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for DefaultActivator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default> Activator<T> for DefaultActivator<T> {
    fn create(&self) -> T {
        T::default()
    }
}

impl<T, F> Activator<T> for F
where
    F: Fn() -> T + Send + Sync,
{
    fn create(&self) -> T {
        self()
    }
}

/// A shared, mutable instance of a reference type.
///
/// Identity is the allocation: two clones of the same `Shared` are the same object. The lock
/// lets an instance be registered in the session before its fields are populated, which is
/// what makes cycles resolvable.
pub struct Shared<T>(Arc<RwLock<T>>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Shared(Arc::new(RwLock::new(value)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write()
    }

    pub fn ptr_eq(&self, other: &Shared<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(self.0.clone())
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(value) => f.debug_tuple("Shared").field(&*value).finish(),
            None => f.write_str("Shared(<locked>)"),
        }
    }
}

/// A type-erased, runtime-typed value. `Object::null()` is the null reference.
#[derive(Clone, Default)]
pub struct Object(Option<ObjectInner>);

#[derive(Clone)]
struct ObjectInner {
    ty: Type,
    value: Arc<dyn Any + Send + Sync>,
}

impl Object {
    pub fn null() -> Self {
        Object(None)
    }

    /// Boxes a plain value (primitives, value types).
    pub fn new<T: Any + Send + Sync>(ty: Type, value: T) -> Self {
        Object(Some(ObjectInner {
            ty,
            value: Arc::new(value),
        }))
    }

    /// Wraps a shared instance, keeping its identity.
    pub fn from_shared<T: Any + Send + Sync>(ty: Type, shared: Shared<T>) -> Self {
        Object(Some(ObjectInner { ty, value: shared.0 }))
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// The runtime type, or `None` for null.
    #[inline]
    pub fn runtime_type(&self) -> Option<&Type> {
        self.0.as_ref().map(|inner| &inner.ty)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|inner| inner.value.downcast_ref::<T>())
    }

    /// The shared instance behind this object, if it holds a `Shared<T>`.
    pub fn downcast_shared<T: Any + Send + Sync>(&self) -> Option<Shared<T>> {
        let inner = self.0.as_ref()?;
        inner.value.clone().downcast::<RwLock<T>>().ok().map(Shared)
    }

    /// Whether both objects are the same allocation (both null counts as the same).
    pub fn ptr_eq(&self, other: &Object) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a.value, &b.value),
            (None, None) => true,
            _ => false,
        }
    }

    /// Address of the allocation, used as the identity key for reference tracking.
    pub(crate) fn identity(&self) -> Option<usize> {
        self.0
            .as_ref()
            .map(|inner| Arc::as_ptr(&inner.value) as *const () as usize)
    }

    fn describe(&self) -> String {
        match self.runtime_type() {
            Some(ty) => ty.to_string(),
            None => "null".to_string(),
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(inner) => write!(f, "Object({} @ {:p})", inner.ty, Arc::as_ptr(&inner.value)),
            None => f.write_str("Object(null)"),
        }
    }
}

/// Types with a fixed runtime type descriptor.
pub trait Described {
    fn described_type() -> Type;
}

/// Conversion between a typed value and its [`Object`] form.
pub trait ObjectValue: Clone + Send + Sync + 'static {
    /// The type a field of this Rust type is declared as.
    fn static_type() -> Type;

    fn into_object(self) -> Object;

    /// # Errors
    /// `TypeMismatch` if `object` does not hold a `Self`.
    fn from_object(object: Object) -> Result<Self>;
}

pub(crate) fn mismatch(expected: Type, object: &Object) -> Error {
    Error::TypeMismatch {
        expected,
        actual: object.describe(),
    }
}

/// The runtime type a field header carries, when it differs from the `declared` type.
///
/// # Errors
/// `TypeMismatch` if a location of the declared type cannot hold the carried type, or the
/// error of an unresolved carried name.
pub(crate) fn carried_runtime_type<'a>(
    declared: &Type,
    field: &'a Field,
) -> Result<Option<&'a Type>> {
    match field.field_type()? {
        Some(actual) if actual != declared => {
            if !declared.is_assignable_from(actual) {
                return Err(Error::TypeMismatch {
                    expected: declared.clone(),
                    actual: actual.to_string(),
                });
            }
            Ok(Some(actual))
        }
        _ => Ok(None),
    }
}

/// Recovers a boxed plain value.
pub fn unbox<T: ObjectValue>(object: &Object) -> Result<T> {
    object
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| mismatch(T::static_type(), object))
}

impl ObjectValue for Object {
    fn static_type() -> Type {
        Type::object()
    }

    fn into_object(self) -> Object {
        self
    }

    fn from_object(object: Object) -> Result<Self> {
        Ok(object)
    }
}

/// Nullable shared instances of a described type.
impl<T: Described + Send + Sync + 'static> ObjectValue for Option<Shared<T>> {
    fn static_type() -> Type {
        T::described_type()
    }

    fn into_object(self) -> Object {
        match self {
            Some(shared) => Object::from_shared(T::described_type(), shared),
            None => Object::null(),
        }
    }

    fn from_object(object: Object) -> Result<Self> {
        if object.is_null() {
            return Ok(None);
        }
        object
            .downcast_shared::<T>()
            .map(Some)
            .ok_or_else(|| mismatch(T::described_type(), &object))
    }
}

macro_rules! boxed_object_value {
    ($($ty:ty => $type_fn:ident),* $(,)?) => {
        $(
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
        )*
    };
}

boxed_object_value! {
    bool => boolean,
    i8 => int8,
    i16 => int16,
    i32 => int32,
    i64 => int64,
    u8 => uint8,
    u16 => uint16,
    u32 => uint32,
    u64 => uint64,
    f32 => float32,
    f64 => float64,
    char => char,
    String => string,
    std::time::Duration => duration,
}

impl ObjectValue for Bytes {
    fn static_type() -> Type {
        Type::bytes()
    }

    fn into_object(self) -> Object {
        Object::new(Self::static_type(), self)
    }

    fn from_object(object: Object) -> Result<Self> {
        unbox(&object)
    }
}

/// Presents a typed codec through the type-erased convention.
///
/// Values whose runtime type differs from the codec's type are dispatched to the exact codec
/// for their runtime type, resolved through the session's provider.
pub struct ErasedCodec<T> {
    ty: Type,
    inner: Arc<dyn FieldCodec<T>>,
}

impl<T: ObjectValue> ErasedCodec<T> {
    pub fn new(ty: Type, inner: Arc<dyn FieldCodec<T>>) -> Self {
        Self { ty, inner }
    }
}

impl<T: ObjectValue> FieldCodec<Object> for ErasedCodec<T> {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &Object,
    ) -> Result<()> {
        if let Some(actual) = value.runtime_type() {
            if *actual != self.ty {
                let codec = session.provider().object_codec(actual)?;
                return codec.write_field(writer, session, field_id_delta, expected, value);
            }
        }
        let typed = T::from_object(value.clone())?;
        self.inner
            .write_field(writer, session, field_id_delta, expected, &typed)
    }

    fn read_value(
        &self,
        reader: &mut Reader,
        session: &mut Session,
        field: &Field,
    ) -> Result<Object> {
        if field.is_reference() {
            return reference::read_reference(reader, session, field, &self.ty);
        }
        if let Some(actual) = carried_runtime_type(&self.ty, field)? {
            let codec = session.provider().object_codec(actual)?;
            return codec.read_value(reader, session, field);
        }
        Ok(self.inner.read_value(reader, session, field)?.into_object())
    }
}

/// Presents a type-erased codec through the typed convention.
pub struct TypedCodec<T> {
    inner: Arc<dyn FieldCodec<Object>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ObjectValue> TypedCodec<T> {
    pub fn new(inner: Arc<dyn FieldCodec<Object>>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

impl<T: ObjectValue> FieldCodec<T> for TypedCodec<T> {
    fn write_field(
        &self,
        writer: &mut Writer,
        session: &mut Session,
        field_id_delta: u32,
        expected: &Type,
        value: &T,
    ) -> Result<()> {
        let object = value.clone().into_object();
        self.inner
            .write_field(writer, session, field_id_delta, expected, &object)
    }

    fn read_value(&self, reader: &mut Reader, session: &mut Session, field: &Field) -> Result<T> {
        T::from_object(self.inner.read_value(reader, session, field)?)
    }
}
